//! Signed sign-in cookies.
//!
//! Cookie value: `<username>|<expires unix secs>|<hex HMAC-SHA256>` where the
//! MAC covers `<username>|<expires>`. The signing key lives in a file that is
//! created with mode 0600 on first start.

use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::header;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::auth::AuthError;
use crate::handler::HttpRequest;

type HmacSha256 = Hmac<Sha256>;

/// Name of the sign-in cookie.
pub const USER_COOKIE: &str = "user-id";

const KEY_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SecureCookieError {
    #[error("secure cookie key {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("secure cookie key {0} is malformed")]
    MalformedKey(String),
    #[error("secure cookie key {0} is readable by other users")]
    InsecurePermissions(String),
}

/// Signs and verifies sign-in cookies.
pub struct SecureCookie {
    key: Vec<u8>,
    lifetime: Duration,
}

impl SecureCookie {
    /// Load the key from `path`, generating it if the file does not exist.
    pub fn initialize(path: &Path, lifetime: Duration) -> Result<Self, SecureCookieError> {
        let io_err = |source| SecureCookieError::Io {
            path: path.display().to_string(),
            source,
        };

        match fs::read_to_string(path) {
            Ok(content) => {
                let mode = fs::metadata(path).map_err(io_err)?.permissions().mode();
                if mode & 0o077 != 0 {
                    return Err(SecureCookieError::InsecurePermissions(path.display().to_string()));
                }
                let key = hex::decode(content.trim())
                    .map_err(|_| SecureCookieError::MalformedKey(path.display().to_string()))?;
                if key.len() < KEY_BYTES {
                    return Err(SecureCookieError::MalformedKey(path.display().to_string()));
                }
                tracing::debug!(path = %path.display(), "Secure cookie key loaded");
                Ok(Self::from_key(key, lifetime))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut key = vec![0u8; KEY_BYTES];
                OsRng.fill_bytes(&mut key);

                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(io_err)?;
                }
                let mut file = fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(path)
                    .map_err(io_err)?;
                file.write_all(hex::encode(&key).as_bytes()).map_err(io_err)?;

                tracing::info!(path = %path.display(), "Secure cookie key generated");
                Ok(Self::from_key(key, lifetime))
            }
            Err(e) => Err(io_err(e)),
        }
    }

    pub fn from_key(key: impl Into<Vec<u8>>, lifetime: Duration) -> Self {
        Self {
            key: key.into(),
            lifetime,
        }
    }

    fn mac(&self, payload: &str) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        mac
    }

    /// Cookie value for `username`, valid for the configured lifetime.
    pub fn sign(&self, username: &str) -> String {
        let expires = now_secs().saturating_add(self.lifetime.as_secs());
        self.sign_until(username, expires)
    }

    fn sign_until(&self, username: &str, expires: u64) -> String {
        let payload = format!("{}|{}", username, expires);
        let signature = hex::encode(self.mac(&payload).finalize().into_bytes());
        format!("{}|{}", payload, signature)
    }

    /// Username carried by a valid, unexpired cookie value.
    pub fn verify(&self, value: &str) -> Result<String, AuthError> {
        let mut parts = value.rsplitn(3, '|');
        let (Some(signature), Some(expires), Some(username)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(AuthError::InvalidCredentials);
        };
        let signature = hex::decode(signature).map_err(|_| AuthError::InvalidCredentials)?;
        self.mac(&format!("{}|{}", username, expires))
            .verify_slice(&signature)
            .map_err(|_| AuthError::InvalidCredentials)?;

        let expires: u64 = expires.parse().map_err(|_| AuthError::InvalidCredentials)?;
        if expires <= now_secs() {
            return Err(AuthError::InvalidCredentials);
        }
        if username.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(username.to_string())
    }

    /// Username from the request's sign-in cookie.
    pub fn read_user(&self, request: &HttpRequest) -> Result<String, AuthError> {
        let value = request
            .headers()
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == USER_COOKIE)
            .map(|(_, value)| value)
            .ok_or(AuthError::MissingCredentials)?;
        self.verify(value)
    }

    /// `Set-Cookie` value signing in `username`.
    pub fn set_cookie(&self, username: &str) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            USER_COOKIE,
            self.sign(username),
            self.lifetime.as_secs()
        )
    }

    /// `Set-Cookie` value removing the sign-in cookie.
    pub fn clear_cookie() -> String {
        format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", USER_COOKIE)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn cookie() -> SecureCookie {
        SecureCookie::from_key(vec![7u8; 32], Duration::from_secs(3600))
    }

    #[test]
    fn test_sign_and_verify() {
        let cookie = cookie();
        let value = cookie.sign("alice");
        assert_eq!(cookie.verify(&value).unwrap(), "alice");
    }

    #[test]
    fn test_tampered_cookie_rejected() {
        let cookie = cookie();
        let value = cookie.sign("alice").replacen("alice", "mallory", 1);
        assert_eq!(cookie.verify(&value), Err(AuthError::InvalidCredentials));

        let other = SecureCookie::from_key(vec![8u8; 32], Duration::from_secs(3600));
        assert_eq!(other.verify(&cookie.sign("alice")), Err(AuthError::InvalidCredentials));
        assert_eq!(cookie.verify("garbage"), Err(AuthError::InvalidCredentials));
    }

    #[test]
    fn test_expired_cookie_rejected() {
        let cookie = cookie();
        let value = cookie.sign_until("alice", now_secs() - 1);
        assert_eq!(cookie.verify(&value), Err(AuthError::InvalidCredentials));
    }

    #[test]
    fn test_read_user_from_header() {
        let cookie = cookie();
        let request = axum::http::Request::builder()
            .header(header::COOKIE, format!("theme=dark; {}={}", USER_COOKIE, cookie.sign("bob")))
            .body(Bytes::new())
            .unwrap();
        assert_eq!(cookie.read_user(&request).unwrap(), "bob");

        let bare = HttpRequest::new(Bytes::new());
        assert_eq!(cookie.read_user(&bare), Err(AuthError::MissingCredentials));
    }

    #[test]
    fn test_key_file_created_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("secure-cookie-key");

        let first = SecureCookie::initialize(&path, Duration::from_secs(60)).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let second = SecureCookie::initialize(&path, Duration::from_secs(60)).unwrap();
        assert_eq!(second.verify(&first.sign("alice")).unwrap(), "alice");
    }

    #[test]
    fn test_world_readable_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secure-cookie-key");
        fs::write(&path, hex::encode([1u8; 32])).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        assert!(matches!(
            SecureCookie::initialize(&path, Duration::from_secs(60)),
            Err(SecureCookieError::InsecurePermissions(_))
        ));
    }
}
