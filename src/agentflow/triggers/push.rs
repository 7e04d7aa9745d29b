//! Shared machinery for push-notification triggers.
//!
//! All push integrations share a three-phase shape: **arm** (register with
//! the upstream service, obtaining a channel id and a resume token),
//! **receive** (verify the upstream signature and extract the change set
//! since the stored token), and **advance** (move the token monotonically,
//! only after successful processing). The shared channel bookkeeping lives
//! in [`PushChannelInfo`](crate::triggers::PushChannelInfo); this module
//! holds the helpers the per-integration handlers have in common.

use crate::agentflow::handler::ParamMap;
use std::time::Duration;
use uuid::Uuid;

/// Channels are renewed at 6/7 of their expiration interval, leaving a
/// full day of slack on a 7-day channel.
pub fn renewal_delay(expiry: Duration) -> Duration {
    expiry / 7 * 6
}

/// Renewal job id for a flow's push channel. Stable so a re-arm replaces
/// the existing renewal job instead of stacking a second one.
pub fn renewal_job_id(integration: &str, flow_id: Uuid) -> String {
    format!("{}_renewal_{}", integration, flow_id)
}

pub(crate) fn require_flow_id(params: &ParamMap) -> Result<Uuid, String> {
    params
        .get("flow_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| "'flow_id' is required".to_string())
}

pub(crate) fn require_user_id(params: &ParamMap) -> Result<i64, String> {
    params
        .get("user_id")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| "'user_id' is required".to_string())
}

pub(crate) fn require_str<'a>(params: &'a ParamMap, name: &str) -> Result<&'a str, String> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("'{}' is required", name))
}

/// Decode base64, accepting both the standard and URL-safe alphabets
/// (Pub/Sub envelopes use the latter). Padding is optional.
pub fn base64_decode(s: &str) -> Result<Vec<u8>, String> {
    const TABLE_CHARS: &[u8; 64] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut table = [255u8; 256];
    for (i, &c) in TABLE_CHARS.iter().enumerate() {
        table[c as usize] = i as u8;
    }
    // URL-safe aliases.
    table[b'-' as usize] = 62;
    table[b'_' as usize] = 63;

    let input = s.trim_end_matches('=');
    let mut output = Vec::with_capacity(input.len() * 3 / 4);

    for chunk in input.as_bytes().chunks(4) {
        if chunk.len() < 2 {
            return Err("truncated base64 input".to_string());
        }
        let mut buf = [0u8; 4];
        for (i, &c) in chunk.iter().enumerate() {
            buf[i] = table[c as usize];
            if buf[i] == 255 {
                return Err(format!("invalid base64 character '{}'", c as char));
            }
        }
        output.push((buf[0] << 2) | (buf[1] >> 4));
        if chunk.len() > 2 {
            output.push(((buf[1] & 0x0F) << 4) | (buf[2] >> 2));
        }
        if chunk.len() > 3 {
            output.push(((buf[2] & 0x03) << 6) | buf[3]);
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renewal_at_six_sevenths() {
        let seven_days = Duration::from_secs(7 * 24 * 3600);
        assert_eq!(renewal_delay(seven_days), Duration::from_secs(6 * 24 * 3600));
    }

    #[test]
    fn test_base64_standard_and_url_safe() {
        assert_eq!(base64_decode("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(base64_decode("aGVsbG8").unwrap(), b"hello");
        // '+' vs '-' and '/' vs '_'
        assert_eq!(
            base64_decode("P38/Pw==").unwrap(),
            base64_decode("P38_Pw==").unwrap()
        );
    }

    #[test]
    fn test_base64_rejects_garbage() {
        assert!(base64_decode("!!!!").is_err());
    }
}
