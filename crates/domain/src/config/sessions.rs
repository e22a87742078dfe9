use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session & summary config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default)]
    pub summary: SummaryConfig,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            summary: SummaryConfig::default(),
        }
    }
}

/// Rolling-summary trigger threshold and budget (spec.md §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// Default 4 turn-pairs (8 messages).
    #[serde(default = "d_threshold")]
    pub turn_pair_threshold: u32,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    /// Number of recent interactions included in the `status.update("summary", ...)`
    /// transcript-slice snapshot.
    #[serde(default = "d_transcript_slice")]
    pub transcript_slice_len: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            turn_pair_threshold: d_threshold(),
            max_tokens: d_max_tokens(),
            transcript_slice_len: d_transcript_slice(),
        }
    }
}

fn d_threshold() -> u32 {
    4
}
fn d_max_tokens() -> u32 {
    500
}
fn d_transcript_slice() -> usize {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_threshold_is_four_turn_pairs() {
        assert_eq!(SummaryConfig::default().turn_pair_threshold, 4);
    }

    #[test]
    fn default_max_tokens_is_500() {
        assert_eq!(SummaryConfig::default().max_tokens, 500);
    }
}
