//! Provenance encoded in the names of demultiplexed reads.

use std::fmt;

/// `run{R}_pool{P}_sample{S}_read{N}`, or `run{R}_sample{S}_read{N}` when
/// the input was demultiplexed before it reached this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadIdentifier {
    pub run: u32,
    pub pool: Option<u32>,
    pub sample: u32,
    pub read: usize,
}

impl ReadIdentifier {
    /// Decode an identifier. Anything after the first `;` or whitespace
    /// (size annotations, descriptions) is ignored.
    pub fn decode(id: &str) -> Result<Self, &'static str> {
        let id = id
            .split(|c: char| c == ';' || c.is_whitespace())
            .next()
            .unwrap_or("");
        let mut fields = id.split('_');

        let run = field(fields.next(), "run")?;
        let second = fields.next().ok_or("missing sample field")?;
        let (pool, sample) = match second.strip_prefix("pool") {
            Some(pool) => {
                let pool = pool.parse().map_err(|_| "pool is not a number")?;
                (Some(pool), field(fields.next(), "sample")?)
            }
            None => (None, field(Some(second), "sample")?),
        };
        let read = field(fields.next(), "read")?;

        if fields.next().is_some() {
            return Err("trailing fields");
        }

        Ok(Self {
            run,
            pool,
            sample,
            read,
        })
    }
}

fn field<T: std::str::FromStr>(s: Option<&str>, prefix: &'static str) -> Result<T, &'static str> {
    let s = s.ok_or("too few fields")?;
    let num = s.strip_prefix(prefix).ok_or("unexpected field name")?;
    num.parse().map_err(|_| "field is not a number")
}

impl fmt::Display for ReadIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "run{}_", self.run)?;
        if let Some(pool) = self.pool {
            write!(f, "pool{}_", pool)?;
        }
        write!(f, "sample{}_read{}", self.sample, self.read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_formats() {
        let pooled = ReadIdentifier {
            run: 3,
            pool: Some(2),
            sample: 17,
            read: 1204,
        };
        assert_eq!(pooled.to_string(), "run3_pool2_sample17_read1204");
        assert_eq!(ReadIdentifier::decode("run3_pool2_sample17_read1204"), Ok(pooled));

        let plain = ReadIdentifier::decode("run3_sample17_read9;size=12;").unwrap();
        assert_eq!(plain.pool, None);
        assert_eq!(plain.read, 9);
    }

    #[test]
    fn malformed() {
        for bad in ["", "run3", "run_pool1_sample1_read1", "run1_pool1_sample1", "run1_pool1_sample1_read1_x", "M00123:1:1"] {
            assert!(ReadIdentifier::decode(bad).is_err(), "{bad}");
        }
    }
}
