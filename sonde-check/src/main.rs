// Sonde Check Tool
// Copyright (c) 2024 The Project Sonde Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// Justification: Fields on SeekOptions may change at any time, but sonde-check doesn't want to be
// updated every time those fields change, therefore always fill in the remaining fields with
// default values.
#![allow(clippy::needless_update)]

use std::fs::File;
use std::path::Path;

use sonde::core::errors::{Error, Result, SeekErrorKind};
use sonde::core::io::MediaSourceInput;
use sonde::core::registry::{ContainerInfo, DynSeeker};
use sonde::core::seek::{SeekOptions, SeekPosition, SeekStep};
use sonde::core::units::{Mark, TimeUs};

use clap::{value_parser, Arg, ArgAction};
use log::{info, warn};
use serde::Serialize;

#[derive(Default)]
struct TestOptions {
    seek_opts: SeekOptions,
    times: Vec<TimeUs>,
    count: u32,
    is_quiet: bool,
    stop_after_fail: bool,
    json: bool,
}

#[derive(Serialize)]
struct SeekResult {
    /// The requested time, in microseconds.
    time: TimeUs,
    target: Mark,
    pos: u64,
    mark: Mark,
    probes: u32,
    steps: u32,
    ref_pos: u64,
    ref_mark: Mark,
    pass: bool,
}

#[derive(Default, Serialize)]
struct TestResult {
    container: String,
    duration: Option<TimeUs>,
    n_seeks: u64,
    n_failed_seeks: u64,
    n_probes: u64,
    max_probes: u32,
    seeks: Vec<SeekResult>,
}

/// A seeker together with the input it seeks.
struct SeekerInstance {
    info: ContainerInfo,
    seeker: DynSeeker,
    input: MediaSourceInput<File>,
}

impl SeekerInstance {
    fn try_open(path: &Path, opts: SeekOptions) -> Result<SeekerInstance> {
        let mut input = MediaSourceInput::try_new(File::open(path)?)?;

        let (info, seeker) = sonde::default::get_registry().make_seeker(&mut input, opts)?;

        Ok(SeekerInstance { info, seeker, input })
    }

    /// Seek to `time` and drive the seek to completion.
    fn seek(&mut self, time: TimeUs) -> Result<SeekPosition> {
        self.seeker.seek(time)?;

        loop {
            match self.seeker.poll(&mut self.input)? {
                SeekStep::RepositionTo(pos) => self.input.reposition(pos)?,
                SeekStep::Converged { resume_pos, mark } => {
                    return Ok(SeekPosition { pos: resume_pos, mark })
                }
            }
        }
    }

    /// Gets the duration of the stream. If the duration is not known, the end of the stream is
    /// searched for the last unit.
    fn duration(&mut self) -> Result<Option<TimeUs>> {
        if self.seeker.seek_map().is_none() {
            // Seeking past the end finds the last unit before failing.
            match self.seek(TimeUs::MAX) {
                Ok(_) | Err(Error::SeekError(SeekErrorKind::OutOfRange)) => (),
                Err(err) => return Err(err),
            }
        }

        Ok(self.seeker.seek_map().map(|map| map.duration()))
    }
}

/// Evenly spaced times across the stream.
fn sweep_times(duration: TimeUs, count: u32) -> Vec<TimeUs> {
    let count = u128::from(count.max(1));

    (0..count).map(|i| (u128::from(duration) * i / count) as TimeUs).collect()
}

fn print_seek(index: usize, res: &SeekResult) {
    println!(
        "  [{:>4}] {:>12.6}s  target {:>12}  pos {:>12}  mark {:>12}  probes {:>3}  {}",
        index,
        res.time as f64 / 1_000_000.0,
        res.target,
        res.pos,
        res.mark,
        res.probes,
        if res.pass { "PASS" } else { "FAIL" },
    );

    if !res.pass {
        println!("         expected pos {:>12}  mark {:>12}", res.ref_pos, res.ref_mark);
    }
}

fn run_check(
    tgt: &mut SeekerInstance,
    reference: &mut SeekerInstance,
    opts: &TestOptions,
    acct: &mut TestResult,
) -> Result<()> {
    let times = if opts.times.is_empty() {
        match acct.duration {
            Some(duration) => sweep_times(duration, opts.count),
            None => {
                warn!("duration of the stream is unknown, only seeking to the start");
                vec![0]
            }
        }
    }
    else {
        opts.times.clone()
    };

    for (i, &time) in times.iter().enumerate() {
        let result = tgt.seek(time).and_then(|pos| Ok((pos, reference.seek(time)?)));

        let (pos, ref_pos) = match result {
            Ok(result) => result,
            Err(err) => {
                warn!("seek to {} us failed: {}", time, err);

                acct.n_seeks += 1;
                acct.n_failed_seeks += 1;

                if opts.stop_after_fail {
                    break;
                }
                continue;
            }
        };

        let session = tgt.seeker.session();

        let res = SeekResult {
            time,
            target: session.target_mark(),
            pos: pos.pos,
            mark: pos.mark,
            probes: session.probe_count(),
            steps: session.step_count(),
            ref_pos: ref_pos.pos,
            ref_mark: ref_pos.mark,
            pass: pos == ref_pos,
        };

        if !opts.is_quiet && !opts.json {
            print_seek(i, &res);
        }

        acct.n_seeks += 1;
        acct.n_failed_seeks += if res.pass { 0 } else { 1 };
        acct.n_probes += u64::from(res.probes);
        acct.max_probes = acct.max_probes.max(res.probes);

        let pass = res.pass;
        acct.seeks.push(res);

        if opts.stop_after_fail && !pass {
            break;
        }
    }

    Ok(())
}

fn run_test(path: &Path, opts: &TestOptions, result: &mut TestResult) -> Result<()> {
    // 1. Instantiate the seeker under test.
    let mut tgt = SeekerInstance::try_open(path, opts.seek_opts)?;

    // 2. Instantiate a reference seeker that never interpolates. It scans forward from the start
    //    of the payload, one unit at a time, until it reaches the target.
    let ref_opts = SeekOptions {
        linear_scan_threshold: u64::MAX,
        max_retries: u32::MAX,
        max_steps: u32::MAX,
        ..opts.seek_opts
    };

    let mut reference = SeekerInstance::try_open(path, ref_opts)?;

    info!("container: {}", tgt.info.long_name);

    result.container = tgt.info.short_name.to_string();
    result.duration = tgt.duration()?;

    // 3. Begin check.
    run_check(&mut tgt, &mut reference, opts, result)
}

fn main() {
    pretty_env_logger::init();

    let matches = clap::Command::new("Sonde Check")
        .version("1.0")
        .author("The Project Sonde Developers")
        .about("Check Sonde seeks against a linear scan of the stream")
        .arg(
            Arg::new("time")
                .long("time")
                .short('t')
                .value_name("SECONDS")
                .value_parser(value_parser!(f64))
                .action(ArgAction::Append)
                .help("Seek to a specific time (may be repeated)"),
        )
        .arg(
            Arg::new("count")
                .long("count")
                .short('n')
                .value_parser(value_parser!(u32))
                .default_value("20")
                .help("The number of evenly spaced seeks to check if no time is given"),
        )
        .arg(
            Arg::new("threshold")
                .long("threshold")
                .value_name("BYTES")
                .value_parser(value_parser!(u64))
                .help("Scan forward instead of interpolating once the window is this narrow"),
        )
        .arg(
            Arg::new("no-bias")
                .long("no-bias")
                .action(ArgAction::SetTrue)
                .help("Do not bias interpolated positions by the length of a unit"),
        )
        .arg(
            Arg::new("stop-after-fail")
                .long("first-fail")
                .short('f')
                .action(ArgAction::SetTrue)
                .help("Stop testing after the first failed seek"),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .short('q')
                .action(ArgAction::SetTrue)
                .help("Only print test results"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print test results as JSON"),
        )
        .arg(Arg::new("INPUT").help("The input file path").required(true).index(1))
        .get_matches();

    let path = match matches.get_one::<String>("INPUT") {
        Some(path) => Path::new(path),
        None => std::process::exit(2),
    };

    let mut seek_opts = SeekOptions {
        interpolation_bias: !matches.get_flag("no-bias"),
        ..Default::default()
    };

    if let Some(&threshold) = matches.get_one::<u64>("threshold") {
        seek_opts.linear_scan_threshold = threshold;
    }

    let times = matches
        .get_many::<f64>("time")
        .map(|times| times.map(|&secs| (secs.max(0.0) * 1_000_000.0) as TimeUs).collect())
        .unwrap_or_default();

    let opts = TestOptions {
        seek_opts,
        times,
        count: matches.get_one::<u32>("count").copied().unwrap_or(20),
        is_quiet: matches.get_flag("quiet"),
        stop_after_fail: matches.get_flag("stop-after-fail"),
        json: matches.get_flag("json"),
        ..Default::default()
    };

    let mut res: TestResult = Default::default();

    if !opts.json {
        println!("Input Path: {}", path.display());
        println!();
    }

    if let Err(err) = run_test(path, &opts, &mut res) {
        eprintln!("Test interrupted by error: {}", err);
        std::process::exit(2);
    }

    if opts.json {
        match serde_json::to_string_pretty(&res) {
            Ok(json) => println!("{}", json),
            Err(err) => {
                eprintln!("Failed to serialize test results: {}", err);
                std::process::exit(2);
            }
        }
    }
    else {
        if !opts.is_quiet {
            println!();
        }

        let mean_probes =
            if res.n_seeks > 0 { res.n_probes as f64 / res.n_seeks as f64 } else { 0.0 };

        println!("Test Results");
        println!("=================================================");
        println!();
        println!("  Container:            {:>12}", res.container);
        match res.duration {
            Some(duration) => println!("  Duration:             {:>11.3}s", duration as f64 / 1e6),
            None => println!("  Duration:             {:>12}", "unknown"),
        }
        println!("  Failed/Total Seeks:   {:>12}/{:>12}", res.n_failed_seeks, res.n_seeks);
        println!("  Mean/Max Probes:      {:>12.2}/{:>12}", mean_probes, res.max_probes);
        println!();
    }

    let ret = if res.n_failed_seeks == 0 {
        if !opts.json {
            println!("PASS");
        }
        0
    }
    else {
        if !opts.json {
            println!("FAIL");
        }
        1
    };

    if !opts.json {
        println!();
    }

    std::process::exit(ret);
}
