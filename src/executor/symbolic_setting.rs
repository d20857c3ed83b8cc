use std::fmt;
use std::fs::File;
use std::str::FromStr;

use colored::Colorize;
use log::info;
use num_bigint_dig::BigInt;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::executor::path_selection::PathSelectionPolicy;

/// Test back end the abstract tests are meant for. Some table and extern
/// models depend on what the back end can express.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestBackend {
    Stf,
    Ptf,
    Protobuf,
}

impl FromStr for TestBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stf" => Ok(TestBackend::Stf),
            "ptf" => Ok(TestBackend::Ptf),
            "protobuf" => Ok(TestBackend::Protobuf),
            _ => Err(format!("unknown test back end `{}`", s)),
        }
    }
}

impl fmt::Display for TestBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestBackend::Stf => "STF",
            TestBackend::Ptf => "PTF",
            TestBackend::Protobuf => "Protobuf",
        };
        write!(f, "{}", s)
    }
}

/// Which match kinds may be widened to a full wildcard when their key is
/// tainted. A disabled policy makes such a table count as tainted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaintRecoveryPolicy {
    pub ternary_mask_zero: bool,
    pub lpm_prefix_zero: bool,
    pub range_full_domain: bool,
}

impl Default for TaintRecoveryPolicy {
    fn default() -> Self {
        TaintRecoveryPolicy {
            ternary_mask_zero: true,
            lpm_prefix_zero: true,
            range_full_domain: true,
        }
    }
}

impl TaintRecoveryPolicy {
    /// Whether a tainted key of `match_kind` can be recovered.
    pub fn recovers(&self, match_kind: &str) -> bool {
        match match_kind {
            "ternary" | "optional" => self.ternary_mask_zero,
            "lpm" => self.lpm_prefix_zero,
            "range" => self.range_full_domain,
            "selector" => true,
            _ => false,
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TestgenSetting {
    pub backend: TestBackend,
    pub path_selection: PathSelectionPolicy,
    pub seed: u64,
    pub max_tests: usize,
    pub max_steps_per_path: usize,
    /// Upper bound on the input packet, in bits.
    pub max_packet_size: u64,
    pub taint_recovery: TaintRecoveryPolicy,
    pub solver_max_assignments: usize,
    /// Variables up to this width are enumerated exhaustively by the solver.
    pub solver_full_enumeration_bits: u32,
    #[serde_as(as = "Vec<DisplayFromStr>")]
    pub solver_extra_candidates: Vec<BigInt>,
}

impl Default for TestgenSetting {
    fn default() -> Self {
        TestgenSetting {
            backend: TestBackend::Stf,
            path_selection: PathSelectionPolicy::DepthFirst,
            seed: 0,
            max_tests: 0,
            max_steps_per_path: 10_000,
            max_packet_size: 12_000,
            taint_recovery: TaintRecoveryPolicy::default(),
            solver_max_assignments: 200_000,
            solver_full_enumeration_bits: 4,
            solver_extra_candidates: Vec::new(),
        }
    }
}

impl fmt::Display for TestgenSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let max_tests = if self.max_tests == 0 {
            "unbounded".to_string()
        } else {
            self.max_tests.to_string()
        };
        write!(
            f,
            "🧪 Testgen Settings:
    ├─ Test Back End                : {}
    ├─ Path Selection               : {}
    ├─ Seed                         : {}
    ├─ Maximum Number of Tests      : {}
    ├─ Maximum Steps per Path       : {}
    ├─ Maximum Packet Size (bits)   : {}
    ├─ Taint Recovery               : ternary={} lpm={} range={}
    ├─ Solver Assignment Budget     : {}
    └─ Solver Full Enumeration Bits : {}",
            self.backend.to_string().bright_yellow(),
            self.path_selection.to_string().bright_yellow(),
            self.seed.to_string().bright_yellow(),
            max_tests.bright_yellow(),
            self.max_steps_per_path.to_string().bright_yellow(),
            self.max_packet_size.to_string().bright_yellow(),
            self.taint_recovery.ternary_mask_zero,
            self.taint_recovery.lpm_prefix_zero,
            self.taint_recovery.range_full_domain,
            self.solver_max_assignments.to_string().bright_yellow(),
            self.solver_full_enumeration_bits.to_string().bright_yellow(),
        )
    }
}

pub fn load_setting_from_json(file_path: &str) -> Result<TestgenSetting, serde_json::Error> {
    match File::open(file_path) {
        Ok(file) => {
            let setting: TestgenSetting = serde_json::from_reader(file)?;
            Ok(setting)
        }
        Err(_) => {
            info!("Use the default setting for test generation");
            Ok(TestgenSetting::default())
        }
    }
}
