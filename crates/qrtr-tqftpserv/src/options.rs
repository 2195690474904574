// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RFC 2347/2348/7440 option negotiation (§4.E). Mirrors `handle_rrq`'s
//! option-parsing loop: recognised keys are applied, unrecognised ones are
//! logged and otherwise ignored, never rejected.

use log::debug;

pub const DEFAULT_BLKSIZE: usize = 512;
pub const DEFAULT_TIMEOUTMS: u32 = 1000;
pub const DEFAULT_WSIZE: usize = 1;
pub const DEFAULT_RSIZE: usize = 0;

/// Negotiated transfer parameters for one RRQ, plus whether any option was
/// present at all (`do_oack` in the original: an RRQ with no trailing
/// options gets a DATA block 1 reply instead of an OACK).
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub blksize: usize,
    pub timeoutms: u32,
    pub wsize: usize,
    pub rsize: usize,
    /// `Some(0)` means "tell me the size"; resolved to the real file size
    /// by the caller once the file is open. `None` means tsize wasn't
    /// requested at all.
    pub tsize: Option<u64>,
    pub negotiated: bool,
}

impl RequestOptions {
    pub fn defaults() -> Self {
        Self {
            blksize: DEFAULT_BLKSIZE,
            timeoutms: DEFAULT_TIMEOUTMS,
            wsize: DEFAULT_WSIZE,
            rsize: DEFAULT_RSIZE,
            tsize: None,
            negotiated: false,
        }
    }

    pub fn parse(pairs: &[(String, String)]) -> Self {
        let mut opts = Self::defaults();
        if pairs.is_empty() {
            return opts;
        }
        opts.negotiated = true;

        for (key, value) in pairs {
            match key.as_str() {
                "blksize" => opts.blksize = value.parse().unwrap_or(DEFAULT_BLKSIZE),
                "timeoutms" => opts.timeoutms = value.parse().unwrap_or(DEFAULT_TIMEOUTMS),
                "wsize" => opts.wsize = value.parse().unwrap_or(DEFAULT_WSIZE),
                "rsize" => opts.rsize = value.parse().unwrap_or(DEFAULT_RSIZE),
                "tsize" => opts.tsize = Some(value.parse().unwrap_or(0)),
                other => debug!("ignoring unknown tftp option '{other}'"),
            }
        }
        opts
    }

    /// Build the OACK payload for these negotiated options, resolving
    /// `tsize=0` ("tell me the size") to `actual_size`.
    pub fn to_oack(&self, actual_size: u64) -> Vec<u8> {
        let tsize = self.tsize.map(|_| actual_size);
        let wsize = (self.wsize != DEFAULT_WSIZE).then_some(self.wsize);
        let rsize = (self.rsize != DEFAULT_RSIZE).then_some(self.rsize);
        crate::protocol::encode_oack(Some(self.blksize), Some(self.timeoutms), tsize, wsize, rsize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_options_means_no_negotiation() {
        let opts = RequestOptions::parse(&[]);
        assert!(!opts.negotiated);
        assert_eq!(opts.blksize, DEFAULT_BLKSIZE);
    }

    #[test]
    fn parses_recognised_options_and_ignores_unknown() {
        let pairs = vec![
            ("blksize".to_string(), "1024".to_string()),
            ("tsize".to_string(), "0".to_string()),
            ("mystery".to_string(), "x".to_string()),
        ];
        let opts = RequestOptions::parse(&pairs);
        assert!(opts.negotiated);
        assert_eq!(opts.blksize, 1024);
        assert_eq!(opts.tsize, Some(0));
    }

    #[test]
    fn tsize_zero_resolves_to_actual_size_in_oack() {
        let opts = RequestOptions::parse(&[("tsize".to_string(), "0".to_string())]);
        let oack = opts.to_oack(4096);
        assert!(oack.windows(4).any(|w| w == b"4096"));
    }
}
