//! Time-indexed hyperparameter schedules and the counters that index them.
//!
//! A [Schedule] is a step function: every entry `(start, value)` holds from
//! `start` elapsed units until the next entry's start. Units are either
//! samples or full sweeps over the data ([UnitType]).
//!
//! ```rust
//! # use stepwise_core::prelude::*;
//! let mut lr = Schedule::from_steps(vec![(2, 0.5), (1, 0.25)], 100, UnitType::Sample).unwrap();
//! assert_eq!(lr.value_at(0), 0.5);
//! assert_eq!(lr.value_at(199), 0.5);
//! assert_eq!(lr.value_at(200), 0.25);
//!
//! // Swapping the schedule mid-training shifts it to start "now".
//! let now = ElapsedCounters { samples: 1000, minibatches: 10, sweeps: 0 };
//! lr.replace(Schedule::constant(0.125), &now);
//! assert_eq!(lr.value_at(1000), 0.125);
//! ```

use std::collections::BTreeMap;

use crate::{
    dictionary::{Dictionary, DictionaryValue},
    error::{Error, Result},
};

/// What a schedule's keys count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    #[default]
    Sample,
    Sweep,
}

impl UnitType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sample => "sample",
            Self::Sweep => "sweep",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sample" => Some(Self::Sample),
            "sweep" => Some(Self::Sweep),
            _ => None,
        }
    }
}

/// Elapsed training time of one learner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ElapsedCounters {
    pub samples: u64,
    pub minibatches: u64,
    pub sweeps: u64,
}

impl ElapsedCounters {
    /// The counter that a schedule with unit `unit` is indexed by.
    pub fn elapsed(&self, unit: UnitType) -> u64 {
        match unit {
            UnitType::Sample => self.samples,
            UnitType::Sweep => self.sweeps,
        }
    }

    /// Records one completed minibatch of `samples` samples.
    pub fn advance(&mut self, samples: u64, sweep_end: bool) {
        self.samples += samples;
        self.minibatches += 1;
        if sweep_end {
            self.sweeps += 1;
        }
    }
}

/// A step function from elapsed units to a hyperparameter value.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    entries: BTreeMap<u64, f64>,
    unit: UnitType,
    epoch_size: u64,
    ref_mb_size: u64,
}

impl Schedule {
    pub const TYPE_TAG: &'static str = "TrainingParameterSchedule";
    pub const CURRENT_VERSION: u64 = 1;

    /// A schedule that never changes.
    pub fn constant(value: f64) -> Self {
        Self {
            entries: BTreeMap::from([(0, value)]),
            unit: UnitType::Sample,
            epoch_size: 1,
            ref_mb_size: 1,
        }
    }

    /// Value `i` holds from `i * epoch_size` units on; the last value holds forever.
    ///
    /// For sweep based schedules an `epoch_size` of zero means one sweep.
    pub fn per_epoch(values: Vec<f64>, epoch_size: u64, unit: UnitType) -> Result<Self> {
        Self::from_steps(values.into_iter().map(|v| (1, v)).collect(), epoch_size, unit)
    }

    /// Each `(count, value)` pair holds for `count * epoch_size` units.
    pub fn from_steps(steps: Vec<(u64, f64)>, epoch_size: u64, unit: UnitType) -> Result<Self> {
        if steps.is_empty() {
            return Err(Error::InvalidArgument("schedule has no values".into()));
        }
        let epoch_size = match (unit, epoch_size) {
            (UnitType::Sweep, 0) => 1,
            (UnitType::Sample, 0) if steps.len() > 1 => {
                return Err(Error::InvalidArgument(
                    "a sample based schedule with several values needs a non-zero epoch size"
                        .into(),
                ))
            }
            (_, e) => e,
        };
        let mut entries = BTreeMap::new();
        let mut start = 0u64;
        for (count, value) in steps {
            if count == 0 {
                return Err(Error::InvalidArgument(
                    "schedule step counts must be positive".into(),
                ));
            }
            entries.insert(start, value);
            start = start.saturating_add(count.saturating_mul(epoch_size));
        }
        Ok(Self {
            entries,
            unit,
            epoch_size,
            ref_mb_size: 1,
        })
    }

    /// Uses `entries` verbatim, keyed by their start in `unit`s.
    pub fn from_entries(entries: BTreeMap<u64, f64>, unit: UnitType) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::InvalidArgument("schedule has no values".into()));
        }
        Ok(Self {
            entries,
            unit,
            epoch_size: 1,
            ref_mb_size: 1,
        })
    }

    /// Per-sample momentum equivalent to a decay time constant of `tau` samples.
    pub fn momentum_as_time_constant(tau: f64) -> Self {
        let value = if tau == 0.0 { 0.0 } else { (-1.0 / tau).exp() };
        Self::constant(value)
    }

    /// Sets the minibatch size the schedule's values are specified for.
    ///
    /// `1` means per sample, `0` means the values apply to a whole minibatch
    /// regardless of its size.
    pub fn with_ref_mb_size(mut self, ref_mb_size: u64) -> Self {
        self.ref_mb_size = ref_mb_size;
        self
    }

    pub fn unit(&self) -> UnitType {
        self.unit
    }

    pub fn epoch_size(&self) -> u64 {
        self.epoch_size
    }

    pub fn ref_mb_size(&self) -> u64 {
        self.ref_mb_size
    }

    pub fn entries(&self) -> impl Iterator<Item = (u64, f64)> + '_ {
        self.entries.iter().map(|(&k, &v)| (k, v))
    }

    /// Value at `elapsed` units: the entry with the greatest start `<= elapsed`,
    /// or the earliest entry if `elapsed` precedes all of them.
    pub fn value_at(&self, elapsed: u64) -> f64 {
        self.entries
            .range(..=elapsed)
            .next_back()
            .or_else(|| self.entries.iter().next())
            .map_or(0.0, |(_, &v)| v)
    }

    /// Value at the time described by `counters`.
    pub fn current(&self, counters: &ElapsedCounters) -> f64 {
        self.value_at(counters.elapsed(self.unit))
    }

    /// Converts a rate read from this schedule to a per-sample rate for a
    /// minibatch of `minibatch_size` samples.
    pub fn per_sample(&self, value: f64, minibatch_size: u64) -> f64 {
        match self.ref_mb_size {
            0 if minibatch_size == 0 => value,
            0 => value / minibatch_size as f64,
            1 => value,
            n => value / n as f64,
        }
    }

    /// Converts a decay rate read from this schedule to the decay that applies
    /// to one minibatch of `minibatch_size` samples.
    pub fn per_minibatch_decay(&self, value: f64, minibatch_size: u64) -> f64 {
        if value == 0.0 || self.ref_mb_size == 0 || self.ref_mb_size == minibatch_size {
            value
        } else {
            value.powf(minibatch_size as f64 / self.ref_mb_size as f64)
        }
    }

    /// Replaces `self` by `new`, shifted so that its time zero is now.
    ///
    /// The shift is the value of the counter in `new`'s unit, not in the
    /// unit of the schedule being replaced. Afterwards `self` takes over
    /// `new`'s unit, epoch size and reference minibatch size, so a sample
    /// based schedule replaced by a sweep based one is indexed by sweeps from
    /// then on.
    pub fn replace(&mut self, new: Schedule, counters: &ElapsedCounters) {
        let offset = counters.elapsed(new.unit);
        tracing::debug!(
            unit = new.unit.name(),
            offset,
            entries = new.entries.len(),
            "replacing schedule"
        );
        let entries = new
            .entries
            .into_iter()
            .map(|(k, v)| (k.saturating_add(offset), v))
            .collect();
        *self = Self { entries, ..new };
    }

    pub fn serialize(&self) -> Dictionary {
        let mut d = Dictionary::new();
        d.insert("version", Self::CURRENT_VERSION);
        d.insert("type", Self::TYPE_TAG);
        d.insert("unit", self.unit.name());
        d.insert("epochSize", self.epoch_size);
        d.insert("refMBSize", self.ref_mb_size);
        let pairs: Vec<DictionaryValue> = self
            .entries
            .iter()
            .map(|(&k, &v)| DictionaryValue::Vector(vec![k.into(), v.into()]))
            .collect();
        d.insert("schedule", pairs);
        d
    }

    pub fn deserialize(d: &Dictionary) -> Result<Self> {
        const REQUIRED: [&str; 5] = ["type", "unit", "epochSize", "refMBSize", "schedule"];
        d.validate("schedule", &REQUIRED, Self::TYPE_TAG, Self::CURRENT_VERSION)?;
        let unit_name = d.require_str("unit")?;
        let unit = UnitType::from_name(unit_name).ok_or_else(|| Error::CheckpointMismatch {
            reason: format!("unknown schedule unit '{unit_name}'"),
        })?;
        let mut entries = BTreeMap::new();
        for pair in d.require_vector("schedule")? {
            let (key, value) = match pair.as_vector() {
                Some([k, v]) => (k.as_size_t(), v.as_double()),
                _ => (None, None),
            };
            match (key, value) {
                (Some(k), Some(v)) => {
                    entries.insert(k, v);
                }
                _ => {
                    return Err(Error::CheckpointMismatch {
                        reason: "schedule entries must be [size_t, double] pairs".into(),
                    })
                }
            }
        }
        if entries.is_empty() {
            return Err(Error::CheckpointMismatch {
                reason: "serialized schedule has no values".into(),
            });
        }
        Ok(Self {
            entries,
            unit,
            epoch_size: d.require_size_t("epochSize")?,
            ref_mb_size: d.require_size_t("refMBSize")?,
        })
    }
}
