use std::collections::BTreeMap;
use std::rc::Rc;

use num_bigint_dig::BigInt;
use serde::{Serialize, Serializer};

use crate::executor::symbolic_value::{evaluate, Model};
use crate::executor::utils::{all_ones, shift_amount, wrap_to_width};
use crate::ir::expression::ExprRef;

/// Test-object categories used by the steppers.
pub const TABLE_CONFIGS: &str = "tableconfigs";
pub const REGISTER_VALUES: &str = "registervalues";
pub const METER_VALUES: &str = "metervalues";
pub const ACTION_PROFILES: &str = "action_profile";
pub const ACTION_SELECTORS: &str = "action_selector";
pub const CLONE_INFOS: &str = "clone_infos";
pub const VALUE_SETS: &str = "valuesets";

fn ser_expr<S: Serializer>(expr: &ExprRef, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&expr.to_string())
}

fn ser_exprs<S: Serializer>(exprs: &Vec<ExprRef>, s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(exprs.iter().map(|e| e.to_string()))
}

fn ser_named_exprs<S: Serializer>(args: &Vec<(String, ExprRef)>, s: S) -> Result<S::Ok, S::Error> {
    s.collect_map(args.iter().map(|(k, v)| (k.clone(), v.to_string())))
}

/// One match of a synthesized control-plane entry.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableMatch {
    Exact {
        #[serde(serialize_with = "ser_expr")]
        key: ExprRef,
        #[serde(serialize_with = "ser_expr")]
        value: ExprRef,
    },
    Ternary {
        #[serde(serialize_with = "ser_expr")]
        key: ExprRef,
        #[serde(serialize_with = "ser_expr")]
        value: ExprRef,
        #[serde(serialize_with = "ser_expr")]
        mask: ExprRef,
    },
    Lpm {
        #[serde(serialize_with = "ser_expr")]
        key: ExprRef,
        #[serde(serialize_with = "ser_expr")]
        value: ExprRef,
        #[serde(serialize_with = "ser_expr")]
        prefix_len: ExprRef,
    },
    Range {
        #[serde(serialize_with = "ser_expr")]
        key: ExprRef,
        #[serde(serialize_with = "ser_expr")]
        low: ExprRef,
        #[serde(serialize_with = "ser_expr")]
        high: ExprRef,
    },
    Optional {
        #[serde(serialize_with = "ser_expr")]
        key: ExprRef,
        #[serde(serialize_with = "ser_expr")]
        value: ExprRef,
        #[serde(serialize_with = "ser_expr")]
        mask: ExprRef,
    },
}

impl TableMatch {
    fn map_exprs<F: Fn(&ExprRef) -> ExprRef>(&self, f: F) -> TableMatch {
        match self {
            TableMatch::Exact { key, value } => TableMatch::Exact {
                key: f(key),
                value: f(value),
            },
            TableMatch::Ternary { key, value, mask } => TableMatch::Ternary {
                key: f(key),
                value: f(value),
                mask: f(mask),
            },
            TableMatch::Lpm {
                key,
                value,
                prefix_len,
            } => TableMatch::Lpm {
                key: f(key),
                value: f(value),
                prefix_len: f(prefix_len),
            },
            TableMatch::Range { key, low, high } => TableMatch::Range {
                key: f(key),
                low: f(low),
                high: f(high),
            },
            TableMatch::Optional { key, value, mask } => TableMatch::Optional {
                key: f(key),
                value: f(value),
                mask: f(mask),
            },
        }
    }

    fn exprs(&self) -> Vec<&ExprRef> {
        match self {
            TableMatch::Exact { key, value } => vec![key, value],
            TableMatch::Ternary { key, value, mask } | TableMatch::Optional { key, value, mask } => {
                vec![key, value, mask]
            }
            TableMatch::Lpm {
                key,
                value,
                prefix_len,
            } => vec![key, value, prefix_len],
            TableMatch::Range { key, low, high } => vec![key, low, high],
        }
    }

    fn key(&self) -> &ExprRef {
        match self {
            TableMatch::Exact { key, .. }
            | TableMatch::Ternary { key, .. }
            | TableMatch::Lpm { key, .. }
            | TableMatch::Range { key, .. }
            | TableMatch::Optional { key, .. } => key,
        }
    }

    /// Whether a packet whose key field carries `key_value` hits this match.
    /// Returns `None` while any control-plane value is still symbolic.
    pub fn matches(&self, key_value: &BigInt) -> Option<bool> {
        let width = self.key().ty().width_bits()?;
        let k = wrap_to_width(key_value, width, false);
        let c = |e: &ExprRef| e.as_bigint().map(|v| wrap_to_width(v, width, false));
        let hit = match self {
            TableMatch::Exact { value, .. } => c(value)? == k,
            TableMatch::Ternary { value, mask, .. } | TableMatch::Optional { value, mask, .. } => {
                let m = c(mask)?;
                (&k & &m) == (c(value)? & m)
            }
            TableMatch::Lpm {
                value, prefix_len, ..
            } => {
                let p = prefix_len.as_bigint()?;
                let shift = width as usize - shift_amount(p, width);
                let m = (all_ones(width) << shift) & all_ones(width);
                (&k & &m) == (c(value)? & m)
            }
            TableMatch::Range { low, high, .. } => c(low)? <= k && k <= c(high)?,
        };
        Some(hit)
    }
}

/// The action half of a control-plane entry: action name and the values of
/// its control-plane parameters.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionCallRule {
    pub name: String,
    #[serde(serialize_with = "ser_named_exprs")]
    pub args: Vec<(String, ExprRef)>,
}

impl ActionCallRule {
    fn evaluate(&self, model: &Model) -> ActionCallRule {
        ActionCallRule {
            name: self.name.clone(),
            args: self
                .args
                .iter()
                .map(|(n, e)| (n.clone(), evaluate(e, model)))
                .collect(),
        }
    }
}

/// A synthesized control-plane entry. Rules with a lower `priority` were
/// added first and are checked first.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableRule {
    pub priority: u64,
    pub matches: Vec<(String, TableMatch)>,
    pub action: ActionCallRule,
    pub ttl: u64,
}

impl TableRule {
    pub fn evaluate(&self, model: &Model) -> TableRule {
        TableRule {
            priority: self.priority,
            matches: self
                .matches
                .iter()
                .map(|(n, m)| (n.clone(), m.map_exprs(|e| evaluate(e, model))))
                .collect(),
            action: self.action.evaluate(model),
            ttl: self.ttl,
        }
    }

    /// Checks a concrete rule against concrete key values, by control-plane
    /// key name. Keys missing from `key_values` fail the match.
    pub fn matches(&self, key_values: &BTreeMap<String, BigInt>) -> Option<bool> {
        for (name, m) in &self.matches {
            match key_values.get(name) {
                Some(v) => {
                    if !m.matches(v)? {
                        return Some(false);
                    }
                }
                None => return Some(false),
            }
        }
        Some(true)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TableProperty {
    ActionProfile(String),
    ActionSelector(String),
    OverridenDefaultAction(ActionCallRule),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableConfig {
    pub table: String,
    pub rules: Vec<TableRule>,
    pub properties: BTreeMap<String, TableProperty>,
}

impl TableConfig {
    pub fn new(table: &str) -> Self {
        TableConfig {
            table: table.to_string(),
            rules: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn add_rule(&mut self, matches: Vec<(String, TableMatch)>, action: ActionCallRule) {
        let priority = self.rules.len() as u64;
        self.rules.push(TableRule {
            priority,
            matches,
            action,
            ttl: 0,
        });
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegisterWrite {
    #[serde(serialize_with = "ser_expr")]
    pub index: ExprRef,
    #[serde(serialize_with = "ser_expr")]
    pub value: ExprRef,
}

/// Contents of a register as observed along one path: the value every cell
/// starts with, then the writes in program order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegisterValue {
    #[serde(serialize_with = "ser_expr")]
    pub initial_value: ExprRef,
    pub writes: Vec<RegisterWrite>,
}

impl RegisterValue {
    pub fn new(initial_value: ExprRef) -> Self {
        RegisterValue {
            initial_value,
            writes: Vec::new(),
        }
    }

    /// Value of the cell at `index`. Returns `None` when a write at a
    /// symbolic index may alias it.
    pub fn current_value(&self, index: &ExprRef) -> Option<ExprRef> {
        for write in self.writes.iter().rev() {
            if &write.index == index {
                return Some(Rc::clone(&write.value));
            }
            match (write.index.as_bigint(), index.as_bigint()) {
                (Some(a), Some(b)) if a != b => continue,
                _ => return None,
            }
        }
        Some(Rc::clone(&self.initial_value))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MeterValue {
    pub is_direct: bool,
    pub results: Vec<RegisterWrite>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionProfile {
    pub name: String,
    pub members: Vec<ActionCallRule>,
}

impl ActionProfile {
    /// Adds a member and returns its index.
    pub fn add_member(&mut self, action: ActionCallRule) -> usize {
        self.members.push(action);
        self.members.len() - 1
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionSelector {
    pub name: String,
    pub profile: ActionProfile,
    #[serde(serialize_with = "ser_exprs")]
    pub selector_keys: Vec<ExprRef>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CloneInfo {
    #[serde(serialize_with = "ser_expr")]
    pub session_id: ExprRef,
    pub clone_type: String,
    pub preserve_field_list: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValueSetConfig {
    #[serde(serialize_with = "ser_exprs")]
    pub elements: Vec<ExprRef>,
}

/// Objects the control plane or the test harness must set up for a path.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TestObject {
    TableConfig(TableConfig),
    RegisterValue(RegisterValue),
    MeterValue(MeterValue),
    ActionProfile(ActionProfile),
    ActionSelector(ActionSelector),
    CloneInfo(CloneInfo),
    ValueSet(ValueSetConfig),
}

impl TestObject {
    pub fn as_table_config(&self) -> Option<&TableConfig> {
        match self {
            TestObject::TableConfig(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_register_value(&self) -> Option<&RegisterValue> {
        match self {
            TestObject::RegisterValue(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_action_profile(&self) -> Option<&ActionProfile> {
        match self {
            TestObject::ActionProfile(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_action_selector(&self) -> Option<&ActionSelector> {
        match self {
            TestObject::ActionSelector(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_value_set(&self) -> Option<&ValueSetConfig> {
        match self {
            TestObject::ValueSet(v) => Some(v),
            _ => None,
        }
    }

    /// Every expression the object holds, in no particular order.
    pub fn exprs(&self) -> Vec<ExprRef> {
        let rule_exprs = |a: &ActionCallRule| a.args.iter().map(|(_, e)| Rc::clone(e)).collect::<Vec<_>>();
        let mut out = Vec::new();
        match self {
            TestObject::TableConfig(c) => {
                for rule in &c.rules {
                    for (_, m) in &rule.matches {
                        out.extend(m.exprs().into_iter().cloned());
                    }
                    out.extend(rule_exprs(&rule.action));
                }
                for p in c.properties.values() {
                    if let TableProperty::OverridenDefaultAction(a) = p {
                        out.extend(rule_exprs(a));
                    }
                }
            }
            TestObject::RegisterValue(r) => {
                out.push(Rc::clone(&r.initial_value));
                for w in &r.writes {
                    out.push(Rc::clone(&w.index));
                    out.push(Rc::clone(&w.value));
                }
            }
            TestObject::MeterValue(m) => {
                for w in &m.results {
                    out.push(Rc::clone(&w.index));
                    out.push(Rc::clone(&w.value));
                }
            }
            TestObject::ActionProfile(p) => p.members.iter().for_each(|m| out.extend(rule_exprs(m))),
            TestObject::ActionSelector(s) => {
                s.profile.members.iter().for_each(|m| out.extend(rule_exprs(m)));
                out.extend(s.selector_keys.iter().cloned());
            }
            TestObject::CloneInfo(c) => out.push(Rc::clone(&c.session_id)),
            TestObject::ValueSet(v) => out.extend(v.elements.iter().cloned()),
        }
        out
    }

    /// Resolves every expression of the object under `model`.
    pub fn evaluate(&self, model: &Model) -> TestObject {
        let ev = |e: &ExprRef| evaluate(e, model);
        let ev_writes = |ws: &[RegisterWrite]| {
            ws.iter()
                .map(|w| RegisterWrite {
                    index: ev(&w.index),
                    value: ev(&w.value),
                })
                .collect::<Vec<_>>()
        };
        let ev_profile = |p: &ActionProfile| ActionProfile {
            name: p.name.clone(),
            members: p.members.iter().map(|m| m.evaluate(model)).collect(),
        };
        match self {
            TestObject::TableConfig(c) => TestObject::TableConfig(TableConfig {
                table: c.table.clone(),
                rules: c.rules.iter().map(|r| r.evaluate(model)).collect(),
                properties: c
                    .properties
                    .iter()
                    .map(|(k, p)| {
                        let p = match p {
                            TableProperty::OverridenDefaultAction(a) => {
                                TableProperty::OverridenDefaultAction(a.evaluate(model))
                            }
                            other => other.clone(),
                        };
                        (k.clone(), p)
                    })
                    .collect(),
            }),
            TestObject::RegisterValue(r) => TestObject::RegisterValue(RegisterValue {
                initial_value: ev(&r.initial_value),
                writes: ev_writes(&r.writes),
            }),
            TestObject::MeterValue(m) => TestObject::MeterValue(MeterValue {
                is_direct: m.is_direct,
                results: ev_writes(&m.results),
            }),
            TestObject::ActionProfile(p) => TestObject::ActionProfile(ev_profile(p)),
            TestObject::ActionSelector(s) => TestObject::ActionSelector(ActionSelector {
                name: s.name.clone(),
                profile: ev_profile(&s.profile),
                selector_keys: s.selector_keys.iter().map(ev).collect(),
            }),
            TestObject::CloneInfo(c) => TestObject::CloneInfo(CloneInfo {
                session_id: ev(&c.session_id),
                clone_type: c.clone_type.clone(),
                preserve_field_list: c.preserve_field_list,
            }),
            TestObject::ValueSet(v) => TestObject::ValueSet(ValueSetConfig {
                elements: v.elements.iter().map(ev).collect(),
            }),
        }
    }
}
