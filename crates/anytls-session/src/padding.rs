//! Padding scheme: process-wide, installed by idempotent replacement.
//!
//! A scheme is a newline-joined set of directives. `stop=N` bounds how many
//! early packets are shaped; `<idx>=lo-hi[,c,lo-hi…]` gives the target sizes
//! for the writes produced while sending packet `idx`. The `c` marker stops
//! shaping early once no real data remains. Example:
//!
//! ```text
//! stop=8
//! 0=30-30
//! 1=100-400
//! 2=400-500,c,500-1000
//! ```

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Scheme compiled into the default build. Matches what panels ship when
/// they have no custom scheme configured.
pub const DEFAULT_PADDING_SCHEME: &str = "stop=8\n\
0=30-30\n\
1=100-400\n\
2=400-500,c,500-1000,c,500-1000\n\
3=9-9,500-1000\n\
4=500-1000\n\
5=500-1000\n\
6=500-1000\n\
7=500-1000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SizeRule {
    /// Target size drawn uniformly from `lo..=hi`.
    Range(u32, u32),
    /// Stop shaping this packet if no real data remains.
    CheckRemain,
}

/// One write the shaper should produce: `data_len` real bytes followed by
/// `pad_len` bytes of waste.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddingChunk {
    pub data_len: usize,
    pub pad_len: usize,
}

#[derive(Debug)]
pub struct PaddingScheme {
    raw: String,
    stop: u32,
    lines: HashMap<u32, Vec<SizeRule>>,
}

impl PaddingScheme {
    /// Parse a raw scheme. Returns `None` on any malformed directive.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(raw).ok()?;
        let mut stop = None;
        let mut lines = HashMap::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=')?;
            if key == "stop" {
                stop = Some(value.parse::<u32>().ok()?);
                continue;
            }
            let idx = key.parse::<u32>().ok()?;
            let mut rules = Vec::new();
            for item in value.split(',') {
                if item == "c" {
                    rules.push(SizeRule::CheckRemain);
                    continue;
                }
                let (lo, hi) = item.split_once('-')?;
                let lo = lo.parse::<u32>().ok()?;
                let hi = hi.parse::<u32>().ok()?;
                if lo > hi {
                    return None;
                }
                rules.push(SizeRule::Range(lo, hi));
            }
            if rules.is_empty() {
                return None;
            }
            lines.insert(idx, rules);
        }

        Some(Self {
            raw: text.to_string(),
            stop: stop.unwrap_or(0),
            lines,
        })
    }

    /// The raw scheme text, as received.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Packet index from which traffic is no longer shaped.
    pub fn stop(&self) -> u32 {
        self.stop
    }

    /// Hex digest identifying this scheme, exchanged in settings frames.
    pub fn checksum(&self) -> String {
        let digest = Sha256::digest(self.raw.as_bytes());
        let mut out = String::with_capacity(64);
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(out, "{byte:02x}");
        }
        out
    }

    /// Split `total` pending bytes into shaped writes for packet `pkt`.
    ///
    /// Past the stop index, or when the packet has no directive, the data
    /// goes out as a single unshaped write.
    pub fn plan(&self, pkt: u32, total: usize) -> Vec<PaddingChunk> {
        let rules = match (pkt < self.stop, self.lines.get(&pkt)) {
            (true, Some(rules)) => rules,
            _ => {
                return vec![PaddingChunk {
                    data_len: total,
                    pad_len: 0,
                }];
            }
        };

        let mut rng = rand::thread_rng();
        let mut remaining = total;
        let mut chunks = Vec::new();
        for rule in rules {
            match *rule {
                SizeRule::CheckRemain => {
                    if remaining == 0 {
                        break;
                    }
                }
                SizeRule::Range(lo, hi) => {
                    let target = rng.gen_range(lo..=hi) as usize;
                    let data_len = remaining.min(target);
                    chunks.push(PaddingChunk {
                        data_len,
                        pad_len: target - data_len,
                    });
                    remaining -= data_len;
                }
            }
        }
        if remaining > 0 {
            chunks.push(PaddingChunk {
                data_len: remaining,
                pad_len: 0,
            });
        }
        chunks
    }
}

fn active() -> &'static ArcSwap<PaddingScheme> {
    static ACTIVE: OnceLock<ArcSwap<PaddingScheme>> = OnceLock::new();
    ACTIVE.get_or_init(|| {
        let scheme = PaddingScheme::parse(DEFAULT_PADDING_SCHEME.as_bytes())
            .unwrap_or(PaddingScheme {
                raw: String::new(),
                stop: 0,
                lines: HashMap::new(),
            });
        ArcSwap::new(Arc::new(scheme))
    })
}

/// Install a padding scheme process-wide.
///
/// Returns `false` (leaving the active scheme untouched) when the input does
/// not parse. Installing the already-active scheme is a no-op.
pub fn update_padding_scheme(raw: &[u8]) -> bool {
    let Some(scheme) = PaddingScheme::parse(raw) else {
        return false;
    };
    if active().load().raw == scheme.raw {
        return true;
    }
    active().store(Arc::new(scheme));
    true
}

/// The currently installed scheme.
pub fn current_scheme() -> Arc<PaddingScheme> {
    active().load_full()
}
