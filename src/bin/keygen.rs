//! One-shot RSA key pair generator for sealed deployments.
//!
//! Usage: `keygen [key-dir]`. Writes `private_key.pem` and `public_key.pem`
//! into the directory (default `certs`), the layout the daemon's
//! `[encryption]` section expects.

use color_eyre::eyre::bail;
use color_eyre::Result;
use nightsense::codec::keys::{KeyMaterial, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};
use std::path::PathBuf;

const RSA_BITS: usize = 2048;

fn main() -> Result<()> {
    color_eyre::install()?;

    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("certs"));

    let private_path = dir.join(PRIVATE_KEY_FILE);
    if private_path.exists() {
        // Replacing the private key would orphan every sealed payload the
        // old key produced.
        bail!(
            "refusing to overwrite existing {}; remove it first",
            private_path.display()
        );
    }

    println!("generating a {}-bit RSA key pair, this can take a moment", RSA_BITS);
    let keys = KeyMaterial::generate(RSA_BITS)?;
    keys.write(&dir)?;

    println!("private key: {}", private_path.display());
    println!("public key:  {}", dir.join(PUBLIC_KEY_FILE).display());
    Ok(())
}
