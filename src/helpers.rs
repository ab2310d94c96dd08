use std::fs::File;
use std::io::BufReader;

use anyhow::{Context, Result};

// Return root certificates, optionally with the provided ca_file appended.
pub fn get_root_certs(ca_file: Option<String>) -> Result<rustls::RootCertStore> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        roots.add(cert)?;
    }

    if let Some(ca_file) = &ca_file {
        let f = File::open(ca_file).context("Open CA certificate")?;
        let mut reader = BufReader::new(f);
        let certs = rustls_pemfile::certs(&mut reader);
        for cert in certs.flatten() {
            roots.add(cert)?;
        }
    }

    Ok(roots)
}

// More than one rustls crypto backend ends up in the dependency tree, so the
// process-wide default must be picked explicitly.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

pub mod hex_encode {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(b: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(b))
    }

    pub fn deserialize<'a, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'a>,
    {
        let s: String = serde::de::Deserialize::deserialize(deserializer)?;

        // HEX encoded values may start with 0x prefix, we must strip this.
        let s = s.trim_start_matches("0x");

        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

// DevAddr only implements Serialize, decode it from its hex form.
pub mod dev_addr {
    use std::str::FromStr;

    use lrwn::DevAddr;
    use serde::Deserializer;

    pub fn deserialize<'a, D>(deserializer: D) -> Result<DevAddr, D::Error>
    where
        D: Deserializer<'a>,
    {
        let s: String = serde::de::Deserialize::deserialize(deserializer)?;
        DevAddr::from_str(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use lrwn::DevAddr;
    use serde::Deserialize;

    use super::*;

    #[derive(Deserialize)]
    struct Session {
        #[serde(deserialize_with = "dev_addr::deserialize")]
        dev_addr: DevAddr,
    }

    #[test]
    fn test_dev_addr_deserialize() {
        let s: Session = serde_json::from_str(r#"{"dev_addr": "01020304"}"#).unwrap();
        assert_eq!(DevAddr::from_be_bytes([1, 2, 3, 4]), s.dev_addr);

        let s: Session = serde_json::from_str(r#"{"dev_addr": "0x0a0b0c0d"}"#).unwrap();
        assert_eq!(DevAddr::from_be_bytes([10, 11, 12, 13]), s.dev_addr);

        assert!(serde_json::from_str::<Session>(r#"{"dev_addr": "zz"}"#).is_err());
    }
}
