// DANS : src/tokens/ata.rs

use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address_with_program_id;
use std::{collections::HashMap, str::FromStr};

#[derive(Debug, thiserror::Error)]
pub enum DeriveError {
    #[error("adresse invalide pour {field} : '{value}'")]
    InvalidAddress { field: &'static str, value: String },
}

pub fn parse_address(field: &'static str, value: &str) -> Result<Pubkey, DeriveError> {
    Pubkey::from_str(value.trim())
        .map_err(|_| DeriveError::InvalidAddress { field, value: value.to_string() })
}

/// Programme de jetons à utiliser pour chaque mint : le programme legacy par
/// défaut, sauf pour les mints listés explicitement (migrés vers Token-2022).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenProgramTable {
    default_program: Pubkey,
    overrides: HashMap<Pubkey, Pubkey>,
}

impl Default for TokenProgramTable {
    fn default() -> Self {
        Self::new(spl_token::id())
    }
}

impl TokenProgramTable {
    pub fn new(default_program: Pubkey) -> Self {
        Self { default_program, overrides: HashMap::new() }
    }

    pub fn with_override(mut self, mint: Pubkey, program: Pubkey) -> Self {
        self.overrides.insert(mint, program);
        self
    }

    pub fn with_token_2022_mints<S: AsRef<str>>(mints: &[S]) -> Result<Self, DeriveError> {
        let mut table = Self::default();
        for mint in mints {
            let mint = parse_address("token_2022_mints", mint.as_ref())?;
            table = table.with_override(mint, spl_token_2022::id());
        }
        Ok(table)
    }

    pub fn program_for(&self, mint: &Pubkey) -> Pubkey {
        self.overrides.get(mint).copied().unwrap_or(self.default_program)
    }

    /// Adresse de l'ATA (owner, mint). Fonction pure, aucun appel réseau.
    pub fn derive_account_address(&self, owner: &Pubkey, mint: &Pubkey) -> Pubkey {
        get_associated_token_address_with_program_id(owner, mint, &self.program_for(mint))
    }

    /// Variante à partir de chaînes base58. Une adresse malformée donne une
    /// erreur, que l'appelant traite comme "solde inconnu".
    pub fn derive_account_address_str(&self, owner: &str, mint: &str) -> Result<Pubkey, DeriveError> {
        let owner = parse_address("owner", owner)?;
        let mint = parse_address("mint", mint)?;
        Ok(self.derive_account_address(&owner, &mint))
    }
}
