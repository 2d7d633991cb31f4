use anyhow::{Context, Result};
use spl_token_2022::{extension::StateWithExtensions, state::Account as TokenAccount};

/// Décode le montant d'un compte de jetons. Accepte le format SPL legacy
/// (165 octets) comme les comptes Token-2022 avec extensions.
pub fn decode_token_amount(data: &[u8]) -> Result<u64> {
    let account = StateWithExtensions::<TokenAccount>::unpack(data)
        .with_context(|| format!("Compte de jetons illisible ({} octets)", data.len()))?;
    Ok(account.base.amount)
}
