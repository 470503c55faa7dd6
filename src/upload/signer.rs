//! Request signing for the platform API.
//!
//! The signature is the lower-case hex MD5 of every request parameter except
//! `sign`, sorted by key and joined as `k=v` pairs with `&`, followed by
//! `&{secret}`.

use chrono::Utc;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

pub const SIGN_PARAM: &str = "sign";

/// Unit of the `timestamp` request parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampUnit {
    Seconds,
    #[default]
    Millis,
}

impl TimestampUnit {
    pub fn now(self) -> String {
        let now = Utc::now();
        match self {
            TimestampUnit::Seconds => now.timestamp().to_string(),
            TimestampUnit::Millis => now.timestamp_millis().to_string(),
        }
    }
}

impl FromStr for TimestampUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "seconds" => Ok(TimestampUnit::Seconds),
            "ms" | "millis" | "milliseconds" => Ok(TimestampUnit::Millis),
            other => Err(format!("unknown timestamp unit '{}'", other)),
        }
    }
}

/// Builds the string that gets digested. Exposed for diagnostics.
pub fn canonical_string<'a, I>(secret: &str, params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let sorted: BTreeMap<&str, &str> = params
        .into_iter()
        .filter(|(k, _)| *k != SIGN_PARAM)
        .collect();

    let mut out = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    out.push('&');
    out.push_str(secret);
    out
}

pub fn sign<'a, I>(secret: &str, params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let digest = Md5::digest(canonical_string(secret, params).as_bytes());
    hex::encode(digest)
}
