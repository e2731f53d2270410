use std::io::Write;

use tracing::{debug, warn};
use xdedup_types::recipe::Recipe;

use crate::error::{Result, XdedupError};
use crate::recipe::RecipeStore;
use crate::trusted::{EnclaveClient, SessionId};

/// Rebuild a stored file into memory.
pub fn restore_file(client: &EnclaveClient, recipes: &RecipeStore, name: &str) -> Result<Vec<u8>> {
    let recipe = recipes.load(name)?;
    let mut out = Vec::with_capacity(recipe.size as usize);
    restore_recipe(client, &recipe, &mut out)?;
    Ok(out)
}

/// Stream a stored file into `out`. Returns the bytes written.
pub fn restore_to<W: Write>(
    client: &EnclaveClient,
    recipes: &RecipeStore,
    name: &str,
    out: &mut W,
) -> Result<u64> {
    let recipe = recipes.load(name)?;
    restore_recipe(client, &recipe, out)
}

/// Decode every entry of `recipe`, in order, through a fresh trusted
/// session. The total must match the recorded size.
pub fn restore_recipe<W: Write>(
    client: &EnclaveClient,
    recipe: &Recipe,
    out: &mut W,
) -> Result<u64> {
    let session = client.open_session()?;
    let result = write_entries(client, session, recipe, out);
    if let Err(e) = client.close_session(session) {
        warn!(session, error = %e, "failed to close restore session");
    }
    let written = result?;
    if written != recipe.size {
        return Err(XdedupError::Malformed(format!(
            "restored {written} bytes of '{}', recipe records {}",
            recipe.name, recipe.size
        )));
    }
    debug!(file = %recipe.name, bytes = written, chunks = recipe.entries.len(), "restored file");
    Ok(written)
}

fn write_entries<W: Write>(
    client: &EnclaveClient,
    session: SessionId,
    recipe: &Recipe,
    out: &mut W,
) -> Result<u64> {
    let mut written = 0u64;
    for entry in &recipe.entries {
        let data = client.decode(session, *entry)?;
        out.write_all(&data)?;
        written += data.len() as u64;
    }
    out.flush()?;
    Ok(written)
}
