//! User policy applied to verdicts.
//!
//! The policy inputs are owned by whoever holds the settings (config file,
//! CLI flags). The pipeline only reads them: `hide_unknown` picks the fallback
//! verdict, the rest decides what happens to a listing.

use serde::{Deserialize, Serialize};

use crate::cache::VerdictOutcome;

/// What to do with a listing whose company is not a recent sponsor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonSponsorAction {
    #[default]
    Hide,
    Dim,
}

/// Final treatment of one listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingDisposition {
    Show,
    Hide,
    Dim,
}

impl std::fmt::Display for ListingDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ListingDisposition::Show => "show",
            ListingDisposition::Hide => "hide",
            ListingDisposition::Dim => "dim",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FilterPolicy {
    /// Master switch; when off every listing is shown
    pub filter_enabled: bool,
    /// Treat unresolvable companies as non-sponsors
    pub hide_unknown: bool,
    pub non_sponsor_action: NonSponsorAction,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            filter_enabled: true,
            hide_unknown: false,
            non_sponsor_action: NonSponsorAction::Hide,
        }
    }
}

/// Verdict used when resolution fails.
pub fn fallback_verdict(hide_unknown: bool) -> bool {
    !hide_unknown
}

impl FilterPolicy {
    pub fn disposition(&self, outcome: &VerdictOutcome) -> ListingDisposition {
        if !self.filter_enabled || outcome.is_sponsor {
            return ListingDisposition::Show;
        }

        match self.non_sponsor_action {
            NonSponsorAction::Hide => ListingDisposition::Hide,
            NonSponsorAction::Dim => ListingDisposition::Dim,
        }
    }
}
