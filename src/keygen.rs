//! RSA identity generation for ceremony operators.

use std::path::PathBuf;

use rsa::RsaPublicKey;

use crate::{crypto, error::Error};

/// Arguments for the keygen command.
pub struct KeygenArgs {
    /// Output directory for key files.
    pub output_dir: PathBuf,
    /// Overwrite existing key files.
    pub force: bool,
}

/// Run the keygen command.
pub fn run(args: KeygenArgs) -> eyre::Result<()> {
    std::fs::create_dir_all(&args.output_dir)?;

    let private_key_path = args.output_dir.join("operator-private.pem");
    let public_key_path = args.output_dir.join("operator-public.pem");

    if !args.force && (private_key_path.exists() || public_key_path.exists()) {
        return Err(Error::KeysAlreadyExist.into());
    }

    let private_key = crypto::generate_rsa_keypair()?;
    let public_pem = crypto::encode_rsa_public_key(&RsaPublicKey::from(&private_key))?;

    crypto::save_rsa_private_key(&private_key_path, &private_key)?;
    std::fs::write(&public_key_path, &public_pem)?;

    println!("Key generation complete!");
    println!();
    println!("{}", String::from_utf8_lossy(&public_pem));
    println!("Register the public key with ceremony initiators.");
    println!("Keep operator-private.pem SECURE - the operator needs it to serve ceremonies.");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        run(KeygenArgs {
            output_dir: dir.path().to_path_buf(),
            force: false,
        })
        .unwrap();
        assert!(dir.path().join("operator-private.pem").exists());
        assert!(dir.path().join("operator-public.pem").exists());

        let loaded = crypto::load_rsa_private_key(&dir.path().join("operator-private.pem")).unwrap();
        let pem = std::fs::read(dir.path().join("operator-public.pem")).unwrap();
        assert_eq!(
            crypto::parse_rsa_public_key(&pem).unwrap(),
            RsaPublicKey::from(&loaded)
        );

        let err = run(KeygenArgs {
            output_dir: dir.path().to_path_buf(),
            force: false,
        })
        .unwrap_err();
        assert!(err.to_string().contains("already exist"));

        run(KeygenArgs {
            output_dir: dir.path().to_path_buf(),
            force: true,
        })
        .unwrap();
    }
}
