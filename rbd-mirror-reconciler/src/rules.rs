// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The fixed table deciding what a tick does.
//!
//! Each tick takes a [`Flags`] snapshot and runs, in table order, the action
//! of every [`Rule`] whose conditions hold.

use serde::Serialize;

/// A condition a rule can test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    Leader,
    LocalAvailable,
    RemoteAvailable,
    RefreshRequested,
}

/// The state of every [`Flag`] at the start of a tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Flags {
    pub leader: bool,
    pub local_available: bool,
    pub remote_available: bool,
    pub refresh_requested: bool,
}

impl Flags {
    pub fn is_set(&self, flag: Flag) -> bool {
        match flag {
            Flag::Leader => self.leader,
            Flag::LocalAvailable => self.local_available,
            Flag::RemoteAvailable => self.remote_available,
            Flag::RefreshRequested => self.refresh_requested,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Ask both clusters to republish pool data, then clear the request.
    RefreshPools,
    /// Enable mirroring on eligible pools and forward pool creation requests.
    ConfigurePools,
    /// Summarize mirroring health.
    AssessStatus,
}

#[derive(Clone, Copy, Debug)]
pub struct Rule {
    pub action: RuleAction,
    pub when_all: &'static [Flag],
    pub when_none: &'static [Flag],
}

impl Rule {
    pub fn applies(&self, flags: &Flags) -> bool {
        self.when_all.iter().all(|flag| flags.is_set(*flag))
            && !self.when_none.iter().any(|flag| flags.is_set(*flag))
    }
}

pub const RULES: &[Rule] = &[
    Rule {
        action: RuleAction::RefreshPools,
        when_all: &[
            Flag::Leader,
            Flag::RefreshRequested,
            Flag::LocalAvailable,
            Flag::RemoteAvailable,
        ],
        when_none: &[],
    },
    Rule {
        action: RuleAction::ConfigurePools,
        when_all: &[Flag::Leader, Flag::LocalAvailable, Flag::RemoteAvailable],
        when_none: &[],
    },
    Rule {
        action: RuleAction::AssessStatus,
        when_all: &[Flag::LocalAvailable, Flag::RemoteAvailable],
        when_none: &[],
    },
];

/// The actions to run for `flags`, in order.
pub fn actions_for(flags: &Flags) -> Vec<RuleAction> {
    RULES
        .iter()
        .filter(|rule| rule.applies(flags))
        .map(|rule| rule.action)
        .collect()
}
