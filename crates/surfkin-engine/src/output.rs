use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use surfkin_core::errors::{ErrorInfo, KinError};

/// Species-number output file name.
pub const SPECNUM_OUTPUT: &str = "specnum_output.txt";
/// Process-statistics output file name.
pub const PROCSTAT_OUTPUT: &str = "procstat_output.txt";
/// General output file name.
pub const GENERAL_OUTPUT: &str = "general_output.txt";

/// Species counts sampled over simulated time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpeciesNumbers {
    /// Sample times.
    pub time: Vec<f64>,
    /// Cumulative event count at each sample.
    pub nevents: Vec<u64>,
    /// Count column per species (gas species count cumulative production).
    pub columns: BTreeMap<String, Vec<f64>>,
}

impl SpeciesNumbers {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// True when no samples were recorded.
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Column for `species`, if the engine reported it.
    pub fn column(&self, species: &str) -> Option<&[f64]> {
        self.columns.get(species).map(Vec::as_slice)
    }
}

/// One process-statistics sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcstatSnapshot {
    /// Configuration counter.
    pub configuration: u64,
    /// Cumulative events at the sample.
    pub nevents: u64,
    /// Simulated time at the sample.
    pub time: f64,
    /// Mean waiting time per step, in step order.
    pub waiting_times: Vec<f64>,
    /// Cumulative occurrences per step, in step order.
    pub occurrences: Vec<u64>,
}

/// Per-step occurrence statistics.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessStatistics {
    /// Step names, `<name>_fwd` / `<name>_rev` for reversible steps.
    pub steps: Vec<String>,
    /// Samples in time order.
    pub snapshots: Vec<ProcstatSnapshot>,
}

impl ProcessStatistics {
    /// Cumulative occurrences per step at the last sample.
    pub fn final_occurrences(&self) -> BTreeMap<String, u64> {
        match self.snapshots.last() {
            Some(last) => self
                .steps
                .iter()
                .cloned()
                .zip(last.occurrences.iter().copied())
                .collect(),
            None => BTreeMap::new(),
        }
    }
}

/// Why the engine stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    /// Simulated-time limit reached.
    MaxTime,
    /// Event limit reached.
    MaxSteps,
    /// Wall-clock limit reached.
    WallTime,
    /// No reason found in the general output.
    Unknown,
}

/// Parsed outputs of one completed engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Species-number time series.
    pub species_numbers: SpeciesNumbers,
    /// Process statistics when sampling was enabled.
    #[serde(default)]
    pub process_statistics: Option<ProcessStatistics>,
    /// Elapsed CPU time reported by the engine, in seconds.
    #[serde(default)]
    pub wall_time: Option<f64>,
    /// Termination reason.
    pub termination: TerminationReason,
}

fn parse_error(file: &str, line: usize, message: impl Into<String>) -> KinError {
    KinError::Engine(
        ErrorInfo::new("output-parse", message)
            .with_context("file", file)
            .with_context("line", line.to_string()),
    )
}

/// Parses `specnum_output.txt` text.
///
/// The header names the columns; `Entry`, `Nevents`, `Time`, `Temperature`
/// and `Energy` come first and every later column is a species.
pub fn parse_specnum(text: &str) -> Result<SpeciesNumbers, KinError> {
    let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
    let header: Vec<&str> = match lines.next() {
        Some((_, header)) => header.split_whitespace().collect(),
        None => return Ok(SpeciesNumbers::default()),
    };
    let time_col = column_index(&header, "Time")
        .ok_or_else(|| parse_error(SPECNUM_OUTPUT, 1, "header lacks a Time column"))?;
    let events_col = column_index(&header, "Nevents")
        .ok_or_else(|| parse_error(SPECNUM_OUTPUT, 1, "header lacks a Nevents column"))?;
    let first_species = column_index(&header, "Energy").map_or(time_col + 1, |idx| idx + 1);

    let mut numbers = SpeciesNumbers::default();
    for name in &header[first_species..] {
        numbers.columns.insert((*name).to_string(), Vec::new());
    }
    for (lineno, row) in lines {
        let fields: Vec<&str> = row.split_whitespace().collect();
        if fields.len() != header.len() {
            return Err(parse_error(
                SPECNUM_OUTPUT,
                lineno + 1,
                format!("expected {} columns, found {}", header.len(), fields.len()),
            ));
        }
        let number = |idx: usize| -> Result<f64, KinError> {
            fields[idx]
                .parse::<f64>()
                .map_err(|err| parse_error(SPECNUM_OUTPUT, lineno + 1, err.to_string()))
        };
        numbers.time.push(number(time_col)?);
        numbers.nevents.push(number(events_col)? as u64);
        for (idx, name) in header.iter().enumerate().skip(first_species) {
            let value = number(idx)?;
            if let Some(column) = numbers.columns.get_mut(*name) {
                column.push(value);
            }
        }
    }
    Ok(numbers)
}

fn column_index(header: &[&str], name: &str) -> Option<usize> {
    header.iter().position(|col| col.eq_ignore_ascii_case(name))
}

/// Parses `procstat_output.txt` text.
///
/// The header lists `Overall` followed by step names. Each sample is a
/// `configuration <n> <nevents> <time>` line, a waiting-time row and an
/// occurrence row, each starting with the `Overall` column.
pub fn parse_procstat(text: &str) -> Result<ProcessStatistics, KinError> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty());
    let header: Vec<&str> = match lines.next() {
        Some((_, header)) => header.split_whitespace().collect(),
        None => return Ok(ProcessStatistics::default()),
    };
    if header.first() != Some(&"Overall") {
        return Err(parse_error(PROCSTAT_OUTPUT, 1, "header must start with Overall"));
    }
    let steps: Vec<String> = header[1..].iter().map(|s| s.to_string()).collect();
    let mut stats = ProcessStatistics {
        steps,
        snapshots: Vec::new(),
    };
    let width = header.len();
    while let Some((lineno, config_line)) = lines.next() {
        let tokens: Vec<&str> = config_line.split_whitespace().collect();
        let (configuration, nevents, time) = match tokens.as_slice() {
            ["configuration", n, events, time] => {
                let bad = |what: &str| parse_error(PROCSTAT_OUTPUT, lineno + 1, format!("bad {what}"));
                (
                    n.parse::<u64>().map_err(|_| bad("configuration"))?,
                    events.parse::<u64>().map_err(|_| bad("event count"))?,
                    time.parse::<f64>().map_err(|_| bad("time"))?,
                )
            }
            _ => {
                return Err(parse_error(
                    PROCSTAT_OUTPUT,
                    lineno + 1,
                    "expected a configuration line",
                ))
            }
        };
        let waiting = next_row::<f64>(&mut lines, width, "waiting-time")?;
        let occurrences = next_row::<u64>(&mut lines, width, "occurrence")?;
        stats.snapshots.push(ProcstatSnapshot {
            configuration,
            nevents,
            time,
            waiting_times: waiting[1..].to_vec(),
            occurrences: occurrences[1..].to_vec(),
        });
    }
    Ok(stats)
}

fn next_row<'a, T: std::str::FromStr>(
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
    width: usize,
    what: &str,
) -> Result<Vec<T>, KinError> {
    let (lineno, row) = lines
        .next()
        .ok_or_else(|| parse_error(PROCSTAT_OUTPUT, 0, format!("truncated before {what} row")))?;
    let values: Vec<T> = row
        .split_whitespace()
        .map(|tok| tok.parse::<T>())
        .collect::<Result<_, _>>()
        .map_err(|_| parse_error(PROCSTAT_OUTPUT, lineno + 1, format!("bad {what} row")))?;
    if values.len() != width {
        return Err(parse_error(
            PROCSTAT_OUTPUT,
            lineno + 1,
            format!("{what} row has {} values, expected {width}", values.len()),
        ));
    }
    Ok(values)
}

/// Extracts the termination reason and CPU time from `general_output.txt`.
pub fn parse_general(text: &str) -> (TerminationReason, Option<f64>) {
    let mut reason = TerminationReason::Unknown;
    let mut cpu = None;
    for line in text.lines() {
        let lower = line.to_ascii_lowercase();
        if lower.contains("max simulated time reached") {
            reason = TerminationReason::MaxTime;
        } else if lower.contains("max number of kmc steps reached")
            || lower.contains("max steps reached")
        {
            reason = TerminationReason::MaxSteps;
        } else if lower.contains("wall time") && lower.contains("reached") {
            reason = TerminationReason::WallTime;
        }
        if lower.contains("elapsed cpu time") {
            cpu = line
                .split(|c: char| c == ':' || c.is_whitespace())
                .filter_map(|tok| tok.parse::<f64>().ok())
                .next();
        }
    }
    (reason, cpu)
}

/// Reads and parses the engine outputs found in `dir`.
///
/// The species-number file is required; process statistics and the general
/// output are optional.
pub fn read_run_outputs(dir: &Path) -> Result<RunResult, KinError> {
    let specnum_path = dir.join(SPECNUM_OUTPUT);
    let specnum = fs::read_to_string(&specnum_path).map_err(|err| {
        KinError::Engine(
            ErrorInfo::new("output-missing", err.to_string())
                .with_context("path", specnum_path.display().to_string()),
        )
    })?;
    let species_numbers = parse_specnum(&specnum)?;
    let process_statistics = match fs::read_to_string(dir.join(PROCSTAT_OUTPUT)) {
        Ok(text) => Some(parse_procstat(&text)?),
        Err(_) => None,
    };
    let (termination, wall_time) = match fs::read_to_string(dir.join(GENERAL_OUTPUT)) {
        Ok(text) => parse_general(&text),
        Err(_) => (TerminationReason::Unknown, None),
    };
    Ok(RunResult {
        species_numbers,
        process_statistics,
        wall_time,
        termination,
    })
}
