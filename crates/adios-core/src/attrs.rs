//! ASCII attribute surface for runtime tuning.
//!
//! Every tunable is addressable by name and read or written as ASCII,
//! the way a sysfs-style control directory would expose it. Numeric
//! attributes render as the integer followed by a newline; the model
//! and batch-statistics attributes render small formatted blocks.
//!
//! | Attribute | Access |
//! |---|---|
//! | `global_latency_window` | read/write |
//! | `bq_refill_below_ratio` | read/write |
//! | `batch_limit_{read,write,discard}` | read/write |
//! | `lat_target_{read,write,discard}` | read/write |
//! | `lat_model_{read,write,discard}` | read |
//! | `batch_actual_max` | read |
//! | `reset_bq_stats` | write (`1` only) |
//! | `reset_lat_model` | write (`1` only) |
//! | `adios_version` | read |

use crate::error::{Error, Result};
use crate::optype::OpType;
use crate::sched::Scheduler;

fn parse_u64(attr: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| Error::InvalidValue {
        attr: attr.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(attr: &str, value: &str) -> Result<u32> {
    value.trim().parse().map_err(|_| Error::InvalidValue {
        attr: attr.to_string(),
        value: value.to_string(),
    })
}

fn invalid(attr: &str, value: &str) -> Error {
    Error::InvalidValue {
        attr: attr.to_string(),
        value: value.to_string(),
    }
}

impl Scheduler {
    /// Read an attribute's current value as ASCII.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownAttribute`] for names outside the table above,
    /// [`Error::WriteOnlyAttribute`] for the reset triggers.
    pub fn read_attr(&self, attr: &str) -> Result<String> {
        match attr {
            "global_latency_window" => Ok(format!("{}\n", self.latency_window())),
            "bq_refill_below_ratio" => Ok(format!("{}\n", self.refill_below_ratio())),

            "batch_limit_read" => Ok(format!("{}\n", self.batch_limit(OpType::Read))),
            "batch_limit_write" => Ok(format!("{}\n", self.batch_limit(OpType::Write))),
            "batch_limit_discard" => Ok(format!("{}\n", self.batch_limit(OpType::Discard))),

            "lat_target_read" => Ok(format!("{}\n", self.latency_target(OpType::Read))),
            "lat_target_write" => Ok(format!("{}\n", self.latency_target(OpType::Write))),
            "lat_target_discard" => Ok(format!("{}\n", self.latency_target(OpType::Discard))),

            "lat_model_read" => Ok(self.format_model(OpType::Read)),
            "lat_model_write" => Ok(self.format_model(OpType::Write)),
            "lat_model_discard" => Ok(self.format_model(OpType::Discard)),

            "batch_actual_max" => {
                let (total, per_op) = self.batch_actual_max();
                Ok(format!(
                    "Total  : {}\nDiscard: {}\nRead   : {}\nWrite  : {}\n",
                    total,
                    per_op[OpType::Discard.index()],
                    per_op[OpType::Read.index()],
                    per_op[OpType::Write.index()],
                ))
            }

            "adios_version" => Ok(format!("{}\n", crate::VERSION)),

            "reset_bq_stats" | "reset_lat_model" => {
                Err(Error::WriteOnlyAttribute(attr.to_string()))
            }

            _ => Err(Error::UnknownAttribute(attr.to_string())),
        }
    }

    /// Write an attribute from ASCII.
    ///
    /// Rejected values leave all state unchanged.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownAttribute`] for names outside the table,
    /// [`Error::ReadOnlyAttribute`] for the read-only ones,
    /// [`Error::InvalidValue`] for unparsable or out-of-range input.
    pub fn write_attr(&self, attr: &str, value: &str) -> Result<()> {
        match attr {
            "global_latency_window" => {
                let window = parse_u64(attr, value)?;
                self.set_latency_window(window);
                Ok(())
            }
            "bq_refill_below_ratio" => {
                let ratio = parse_u32(attr, value)?;
                self.set_refill_below_ratio(ratio)
                    .map_err(|_| invalid(attr, value))
            }

            "batch_limit_read" | "batch_limit_write" | "batch_limit_discard" => {
                let limit = parse_u32(attr, value)?;
                let op = op_suffix(attr);
                self.set_batch_limit(op, limit)
                    .map_err(|_| invalid(attr, value))
            }

            "lat_target_read" | "lat_target_write" | "lat_target_discard" => {
                let target = parse_u64(attr, value)?;
                self.set_latency_target(op_suffix(attr), target);
                Ok(())
            }

            "reset_bq_stats" => {
                if value.trim() != "1" {
                    return Err(invalid(attr, value));
                }
                self.reset_bq_stats();
                Ok(())
            }
            "reset_lat_model" => {
                if value.trim() != "1" {
                    return Err(invalid(attr, value));
                }
                self.reset_latency_models();
                Ok(())
            }

            "lat_model_read" | "lat_model_write" | "lat_model_discard" | "batch_actual_max"
            | "adios_version" => Err(Error::ReadOnlyAttribute(attr.to_string())),

            _ => Err(Error::UnknownAttribute(attr.to_string())),
        }
    }

    fn format_model(&self, op: OpType) -> String {
        let (base, slope) = self.model_params(op);
        format!("base : {base} ns\nslope: {slope} ns/KiB\n")
    }
}

fn op_suffix(attr: &str) -> OpType {
    if attr.ends_with("_read") {
        OpType::Read
    } else if attr.ends_with("_write") {
        OpType::Write
    } else {
        OpType::Discard
    }
}
