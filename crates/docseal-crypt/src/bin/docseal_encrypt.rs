//! Utility for producing password-encrypted OLE containers from a plain package.
//!
//! Handy for regenerating fixtures without Office.

use docseal_crypt::{encrypt_to_ole, EncryptOptions, EncryptionMode};

const USAGE: &str = "Usage: docseal-encrypt <input> <output> <password> [binaryrc4|cryptoapi|standard|agile]";

fn run(args: &[String]) -> Result<(), String> {
    let (input, output, password, mode) = match args {
        [input, output, password] => (input, output, password, EncryptionMode::Agile),
        [input, output, password, mode] => (
            input,
            output,
            password,
            mode.parse::<EncryptionMode>().map_err(|err| err.to_string())?,
        ),
        _ => return Err(USAGE.to_string()),
    };

    let plaintext =
        std::fs::read(input).map_err(|err| format!("failed to read {input}: {err}"))?;
    let encrypted = encrypt_to_ole(&plaintext, password, &EncryptOptions::for_mode(mode))
        .map_err(|err| format!("failed to encrypt {input}: {err}"))?;
    std::fs::write(output, encrypted).map_err(|err| format!("failed to write {output}: {err}"))
}

fn main() {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if let Err(msg) = run(&args) {
        eprintln!("{msg}");
        std::process::exit(2);
    }
}
