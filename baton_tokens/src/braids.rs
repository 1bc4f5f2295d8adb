use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

/// Writes at most `f.width()` characters of a secret, eliding the rest
///
/// Used only when a caller explicitly opts in with the alternate flag.
fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// A signed, short-lived access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// A signed, long-lived refresh token
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

limited_reveal!(RefreshTokenRef: "REFRESH TOKEN", 5);

/// The name a user logs in with
#[braid(serde)]
pub struct Username;

/// A user's password
#[braid(serde, debug = "owned", display = "owned")]
pub struct Password;

limited_reveal!(PasswordRef: "PASSWORD", 0);
