//! SCRAM-SHA-256 client exchange.
//!
//! Pure logic over message bytes, the connection drives the actual round trips.
//!
//! <https://datatracker.ietf.org/doc/html/rfc5802>
//! <https://datatracker.ietf.org/doc/html/rfc7677>
use std::borrow::Cow;

use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

/// Name of the only supported SASL method.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

const NONCE_LENGTH: usize = 18;

// channel binding not supported, base64 of `n,,`
const CHANNEL_BINDING: &str = "c=biws";

/// Error during SCRAM exchange.
#[derive(Debug, thiserror::Error)]
pub enum ScramError {
    #[error("malformed SCRAM message: {0}")]
    Malformed(&'static str),
    #[error("server signature does not match")]
    InvalidSignature,
    #[error("no supported SASL method in {0:?}")]
    UnsupportedMethod(Vec<String>),
    #[error("server nonce does not extend the client nonce")]
    NonceMismatch,
}

/// Client side of one SCRAM-SHA-256 exchange.
#[derive(Debug, Clone)]
pub struct ScramClient {
    nonce: String,
    first_bare: String,
}

/// Client final message and the server signature expected in reply.
#[derive(Debug, Clone)]
pub struct ScramFinal {
    pub message: String,
    pub server_signature: [u8; 32],
}

impl ScramClient {
    /// Create exchange with 18 random bytes of nonce.
    pub fn new(user: &str) -> Self {
        let nonce = STANDARD.encode(rand::random::<[u8; NONCE_LENGTH]>());
        Self::with_nonce(user, &nonce)
    }

    /// Create exchange with an already encoded nonce.
    pub fn with_nonce(user: &str, nonce: &str) -> Self {
        let user = normalize(user);
        let user = escape_name(&user);
        let first_bare = format!("n={user},r={nonce}");
        Self { nonce: nonce.to_owned(), first_bare }
    }

    /// Select the SCRAM method out of the server offered methods.
    pub fn select_method<S: AsRef<str>>(methods: &[S]) -> Result<&'static str, ScramError> {
        match methods.iter().any(|m| m.as_ref() == SCRAM_SHA_256) {
            true => Ok(SCRAM_SHA_256),
            false => Err(ScramError::UnsupportedMethod(
                methods.iter().map(|m| m.as_ref().to_owned()).collect(),
            )),
        }
    }

    /// Client first message, with the gs2 header.
    pub fn initial_message(&self) -> String {
        format!("n,,{}", self.first_bare)
    }

    /// Compute the client final message from the server first message.
    pub fn final_message(&self, server_first: &[u8], password: &str) -> Result<ScramFinal, ScramError> {
        let server_first = std::str::from_utf8(server_first)
            .map_err(|_| ScramError::Malformed("server first message is not utf8"))?;

        let fields = parse_fields(server_first);
        if fields.len() < 3 {
            return Err(ScramError::Malformed("server first message needs at least 3 fields"));
        }

        let nonce = field(&fields, 'r').ok_or(ScramError::Malformed("missing nonce"))?;
        let salt = field(&fields, 's').ok_or(ScramError::Malformed("missing salt"))?;
        let iterations = field(&fields, 'i').ok_or(ScramError::Malformed("missing iteration count"))?;

        if !nonce.starts_with(&self.nonce) || nonce.len() == self.nonce.len() {
            return Err(ScramError::NonceMismatch);
        }

        let salt = STANDARD
            .decode(salt)
            .map_err(|_| ScramError::Malformed("salt is not base64"))?;
        let iterations = match iterations.parse::<u32>() {
            Ok(i) if i > 0 => i,
            _ => return Err(ScramError::Malformed("invalid iteration count")),
        };

        let without_proof = format!("{CHANNEL_BINDING},r={nonce}");
        let auth_message = format!("{},{server_first},{without_proof}", self.first_bare);

        let password = normalize(password);
        let salted_password = pbkdf2::pbkdf2_hmac_array::<Sha256, 32>(
            password.as_bytes(),
            &salt,
            iterations,
        );

        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = Sha256::digest(client_key);
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());

        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(client_signature) {
            *p ^= s;
        }

        let server_key = hmac_sha256(&salted_password, b"Server Key");
        let server_signature = hmac_sha256(&server_key, auth_message.as_bytes());

        crate::common::verbose!(iterations, "computed scram client proof");

        Ok(ScramFinal {
            message: format!("{without_proof},p={}", STANDARD.encode(proof)),
            server_signature,
        })
    }

    /// Check the server final message against the expected signature.
    pub fn verify_server_final(server_final: &[u8], expected: &[u8; 32]) -> Result<(), ScramError> {
        let server_final = std::str::from_utf8(server_final)
            .map_err(|_| ScramError::Malformed("server final message is not utf8"))?;
        let fields = parse_fields(server_final);

        if field(&fields, 'e').is_some() {
            return Err(ScramError::InvalidSignature);
        }

        let verifier = field(&fields, 'v').ok_or(ScramError::Malformed("missing verifier"))?;
        let verifier = STANDARD
            .decode(verifier)
            .map_err(|_| ScramError::Malformed("verifier is not base64"))?;

        match verifier.as_slice() == expected {
            true => Ok(()),
            false => Err(ScramError::InvalidSignature),
        }
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    // hmac accepts keys of any length
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("hmac key of any size is valid"));
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

fn normalize(value: &str) -> Cow<'_, str> {
    stringprep::saslprep(value).unwrap_or(Cow::Borrowed(value))
}

fn escape_name(name: &str) -> Cow<'_, str> {
    match name.contains([',', '=']) {
        true => Cow::Owned(name.replace('=', "=3D").replace(',', "=2C")),
        false => Cow::Borrowed(name),
    }
}

fn parse_fields(message: &str) -> Vec<(char, &str)> {
    message
        .split(',')
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(key), None) => Some((key, value)),
                _ => None,
            }
        })
        .collect()
}

fn field<'a>(fields: &[(char, &'a str)], key: char) -> Option<&'a str> {
    fields.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

#[cfg(test)]
mod test {
    use super::*;

    // RFC 7677 section 3
    const NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str = "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const CLIENT_FINAL: &str = "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
    const SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    #[test]
    fn reference_exchange() {
        let client = ScramClient::with_nonce("user", NONCE);
        assert_eq!(client.initial_message(), "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");

        let fin = client.final_message(SERVER_FIRST.as_bytes(), "pencil").unwrap();
        assert_eq!(fin.message, CLIENT_FINAL);

        ScramClient::verify_server_final(SERVER_FINAL.as_bytes(), &fin.server_signature).unwrap();
    }

    #[test]
    fn signature_mismatch() {
        let client = ScramClient::with_nonce("user", NONCE);
        let fin = client.final_message(SERVER_FIRST.as_bytes(), "not pencil").unwrap();
        let err = ScramClient::verify_server_final(SERVER_FINAL.as_bytes(), &fin.server_signature);
        assert!(matches!(err, Err(ScramError::InvalidSignature)));
    }

    #[test]
    fn malformed_server_first() {
        let client = ScramClient::with_nonce("user", NONCE);
        let err = client.final_message(b"r=rOprNGfwEbeRWgbNEkqOabc,s=W22ZaJ0SNY7soEsUEjb6gQ==", "pencil");
        assert!(matches!(err, Err(ScramError::Malformed(_))));

        let err = client.final_message(b"r=somethingelse,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096", "pencil");
        assert!(matches!(err, Err(ScramError::NonceMismatch)));
    }

    #[test]
    fn random_nonce() {
        let a = ScramClient::new("edgedb");
        let b = ScramClient::new("edgedb");
        assert_ne!(a.initial_message(), b.initial_message());
        assert_eq!(a.nonce.len(), 24);
    }

    #[test]
    fn method_selection() {
        assert_eq!(ScramClient::select_method(&["SCRAM-SHA-256"]).unwrap(), SCRAM_SHA_256);
        assert!(matches!(
            ScramClient::select_method(&["MD5"]),
            Err(ScramError::UnsupportedMethod(m)) if m == ["MD5"]
        ));
    }
}
