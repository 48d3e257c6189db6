// Copyright 2026 by the classplan contributors
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except in compliance with
// the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::io::Write as IoWrite;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::{Arg, ArgAction, ArgMatches};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use classplan::algorithms::Algorithm;
use classplan::baseline;
use classplan::config::{Config, DEFAULT_CONFIG_FILE};
use classplan::constraints::{AssignmentState, Checker};
use classplan::coordinator::{self, CoordinatorOptions, Strategy};
use classplan::error::{Error, Result};
use classplan::init::{self, InitStrategy};
use classplan::io::{self, report, table};
use classplan::progress::{IterationEvent, LogLevel, ProgressCallback};
use classplan::scoring;
use classplan::School;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!(
        "This is the classplan class assignment optimizer, version {}",
        option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
    );
    let args = parse_cli_args();
    if let Err(e) = dispatch(&args) {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }
}

fn dispatch(args: &ArgMatches) -> Result<()> {
    match args.subcommand() {
        Some(("score", sub)) => cmd_score(sub),
        Some(("optimize", sub)) => cmd_optimize(sub),
        Some(("baseline", sub)) => cmd_baseline(sub),
        Some(("generate-assignment", sub)) => cmd_generate_assignment(sub),
        Some(("validate", sub)) => cmd_validate(sub),
        Some(("config", sub)) => cmd_config(sub),
        Some(("interactive", sub)) => cmd_interactive(sub),
        _ => unreachable!("subcommand is required"),
    }
}

// ---------------------------------------------------------------------------
// Shared plumbing

fn load_config(sub: &ArgMatches) -> Result<Config> {
    let mut config = match sub.get_one::<String>("config") {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(DEFAULT_CONFIG_FILE)?,
    };
    if let Some(m) = sub.get_one::<usize>("min_friends") {
        config.constraints.minimum_friends = *m;
    }
    if let Some(n) = sub.get_one::<usize>("max_iterations") {
        config.optimization.max_iterations = *n;
    }
    if let Some(n) = sub.get_one::<usize>("early_stop") {
        config.optimization.early_stop_threshold = *n;
    }
    if let Some(k) = sub.get_one::<usize>("target_classes") {
        config.class_config.target_classes = Some(*k);
    }
    config.validate()?;
    Ok(config)
}

fn read_school(sub: &ArgMatches, config: &Config) -> Result<(School, PathBuf)> {
    let input: &String = sub.get_one("INPUT").expect("INPUT is required");
    let path = PathBuf::from(input);
    debug!("reading input table {} ...", path.display());
    let school = table::read_path(&path, config, sub.get_flag("skip_validation"))?;
    if cfg!(debug_assertions) {
        io::assert_data_consistency(&school);
    }
    info!(
        "found {} students and {} classes in {}",
        school.roster().len(),
        school.num_classes(),
        path.display()
    );
    Ok((school, path))
}

fn log_level(sub: &ArgMatches) -> Result<LogLevel> {
    match sub.get_one::<String>("log_level") {
        Some(level) => LogLevel::from_str(level),
        None => Ok(LogLevel::Normal),
    }
}

fn seed(sub: &ArgMatches) -> u64 {
    sub.get_one::<u64>("random_seed").copied().unwrap_or(0)
}

/// The core emits rate-limited iteration events; the CLI turns them into
/// log lines.
fn progress_logger() -> ProgressCallback {
    Arc::new(|event: &IterationEvent| {
        info!(
            "iteration {:>6}/{}: current {:8.3}, best {:8.3}",
            event.iteration, event.total_estimate, event.current_score, event.best_score
        );
    })
}

/// Build a feasible starting snapshot when the input is not fully assigned.
fn starting_snapshot(
    school: School,
    sub: &ArgMatches,
    config: &Config,
    base_seed: u64,
) -> Result<School> {
    let checker = Checker::new(config);
    let state = checker.classify(&school);
    if state == AssignmentState::FullyAssigned && checker.validate(&school).is_empty() {
        return Ok(school);
    }

    let strategy = match sub.get_one::<String>("init_strategy") {
        Some(name) => InitStrategy::from_str(name)?,
        None => InitStrategy::default(),
    };
    info!(
        "input is {:?}; building a starting assignment with strategy {}",
        state,
        strategy.name()
    );
    let labels = if config.class_config.target_classes.is_some() {
        init::default_labels(init::target_classes(school.roster().len(), config))
    } else {
        school.labels().to_vec()
    };
    let mut rng = StdRng::seed_from_u64(base_seed);
    init::initialize(school.roster(), labels, strategy, config, &mut rng)
}

fn parse_algorithms(sub: &ArgMatches) -> Result<Vec<Algorithm>> {
    if let Some(names) = sub.get_many::<String>("algorithms") {
        return names.map(|name| Algorithm::from_str(name)).collect();
    }
    match sub.get_one::<String>("algorithm") {
        Some(name) => Ok(vec![Algorithm::from_str(name)?]),
        None => Ok(vec![Algorithm::RandomSwap]),
    }
}

fn print_score_summary(scores: &scoring::ScoreResult) {
    println!("final score:   {:8.3}", scores.final_score);
    println!("student layer: {:8.3}", scores.student_layer);
    println!("class layer:   {:8.3}", scores.class_layer);
    println!("school layer:  {:8.3}", scores.school_layer);
    for (label, class) in &scores.per_class {
        println!(
            "  class {:>4}: {:3} students, score {:7.3}",
            label, class.size, class.score
        );
    }
}

// ---------------------------------------------------------------------------
// Subcommands

fn cmd_score(sub: &ArgMatches) -> Result<()> {
    let config = load_config(sub)?;
    let (school, input) = read_school(sub, &config)?;
    let scores = scoring::score(&school, &config);

    print_score_summary(&scores);
    if sub.get_flag("print") {
        print!("{}", io::format_assignment(&school, Some(&scores)));
    }

    let dir = report::create_run_dir("score", &input, "none")?;
    report::write_artifacts(
        &dir,
        &school,
        &scores,
        &config,
        &report::RunInfo {
            operation: "score".to_string(),
            input_path: input,
            algorithm_or_strategy: "none".to_string(),
            initial_score: scores.final_score,
            final_score: scores.final_score,
            duration_seconds: 0.0,
            iterations: 0,
            constraints_satisfied: Checker::new(&config).validate(&school).is_empty(),
        },
    )
}

fn cmd_optimize(sub: &ArgMatches) -> Result<()> {
    let config = load_config(sub)?;
    let (school, input) = read_school(sub, &config)?;
    let base_seed = seed(sub);
    let start = starting_snapshot(school, sub, &config, base_seed)?;

    let algorithms = parse_algorithms(sub)?;
    let strategy = match sub.get_one::<String>("strategy") {
        Some(name) => Strategy::from_str(name)?,
        None => Strategy::Single,
    };
    let mut options = CoordinatorOptions::new(strategy, algorithms);
    options.base_seed = base_seed;
    options.level = log_level(sub)?;
    options.callback = Some(progress_logger());

    let outcome = coordinator::execute(&start, &config, &options)?;
    for failure in &outcome.failures {
        warn!("a run failed: {}", failure);
    }

    let label = match strategy {
        Strategy::Single => options.algorithms[0].name().to_string(),
        _ => strategy.name().to_string(),
    };
    let (best, initial_score, iterations, satisfied) = match outcome.best_run() {
        Some(run) => (
            run.best_snapshot.clone(),
            run.initial_score,
            run.iterations_used,
            run.constraint_violations_at_end == 0,
        ),
        None => {
            warn!("no run succeeded; returning the starting assignment unchanged");
            let satisfied = Checker::new(&config).validate(&start).is_empty();
            (
                start.clone(),
                scoring::final_score(&start, &config),
                0,
                satisfied,
            )
        }
    };

    let scores = scoring::score(&best, &config);
    info!(
        "optimization finished: {:.3} -> {:.3}",
        initial_score, scores.final_score
    );
    print_score_summary(&scores);
    if sub.get_flag("print") {
        print!("{}", io::format_assignment(&best, Some(&scores)));
    }

    let dir = report::create_run_dir("optimize", &input, &label)?;
    report::write_artifacts(
        &dir,
        &best,
        &scores,
        &config,
        &report::RunInfo {
            operation: "optimize".to_string(),
            input_path: input,
            algorithm_or_strategy: label,
            initial_score,
            final_score: scores.final_score,
            duration_seconds: outcome
                .runs
                .iter()
                .map(|r| r.elapsed.as_secs_f64())
                .sum(),
            iterations,
            constraints_satisfied: satisfied,
        },
    )?;
    if let Some(output) = sub.get_one::<String>("output") {
        table::write_path(output, &best)?;
        info!("assignment written to {}", output);
    }

    if outcome.runs.is_empty() {
        if let Some(failure) = outcome.failures.into_iter().next() {
            return Err(failure);
        }
    }
    Ok(())
}

fn cmd_baseline(sub: &ArgMatches) -> Result<()> {
    let config = load_config(sub)?;
    let (school, input) = read_school(sub, &config)?;
    let base_seed = seed(sub);
    let start = starting_snapshot(school, sub, &config, base_seed)?;
    let num_runs = sub
        .get_one::<usize>("num_runs")
        .copied()
        .unwrap_or(baseline::DEFAULT_NUM_RUNS);

    let result = baseline::generate(
        &start,
        &config,
        num_runs,
        base_seed,
        None,
        log_level(sub)?,
        Some(progress_logger()),
        Default::default(),
    )?;
    print!("{}", result);

    let dir = report::create_run_dir("baseline", &input, "random_swap")?;
    let scores = scoring::score(&start, &config);
    report::write_artifacts(
        &dir,
        &start,
        &scores,
        &config,
        &report::RunInfo {
            operation: "baseline".to_string(),
            input_path: input,
            algorithm_or_strategy: "random_swap".to_string(),
            initial_score: scores.final_score,
            final_score: result.max,
            duration_seconds: result.runs.iter().map(|r| r.duration_seconds).sum(),
            iterations: result.runs.iter().map(|r| r.iterations_used).sum(),
            constraints_satisfied: true,
        },
    )?;
    serde_json::to_writer_pretty(
        std::fs::File::create(dir.join("baseline.json"))?,
        &result,
    )?;
    Ok(())
}

fn cmd_generate_assignment(sub: &ArgMatches) -> Result<()> {
    let config = load_config(sub)?;
    let (school, input) = read_school(sub, &config)?;
    let base_seed = seed(sub);

    let strategy = match sub.get_one::<String>("init_strategy") {
        Some(name) => InitStrategy::from_str(name)?,
        None => InitStrategy::default(),
    };
    let labels = if school.assigned_count() > 0
        && config.class_config.target_classes.is_none()
    {
        school.labels().to_vec()
    } else {
        init::default_labels(init::target_classes(school.roster().len(), &config))
    };
    let mut rng = StdRng::seed_from_u64(base_seed);
    let fresh = init::initialize(school.roster(), labels, strategy, &config, &mut rng)?;

    let scores = scoring::score(&fresh, &config);
    print_score_summary(&scores);
    if sub.get_flag("print") {
        print!("{}", io::format_assignment(&fresh, Some(&scores)));
    }

    let dir = report::create_run_dir("generate", &input, strategy.name())?;
    report::write_artifacts(
        &dir,
        &fresh,
        &scores,
        &config,
        &report::RunInfo {
            operation: "generate-assignment".to_string(),
            input_path: input,
            algorithm_or_strategy: strategy.name().to_string(),
            initial_score: scores.final_score,
            final_score: scores.final_score,
            duration_seconds: 0.0,
            iterations: 0,
            constraints_satisfied: true,
        },
    )?;
    if let Some(output) = sub.get_one::<String>("output") {
        table::write_path(output, &fresh)?;
        info!("assignment written to {}", output);
    }
    Ok(())
}

fn cmd_validate(sub: &ArgMatches) -> Result<()> {
    let config = load_config(sub)?;
    let (school, input) = read_school(sub, &config)?;
    let checker = Checker::new(&config);

    let state = checker.classify(&school);
    println!("input:            {}", input.display());
    println!("students:         {}", school.roster().len());
    println!("classes:          {}", school.num_classes());
    println!("assignment state: {:?}", state);

    let violations = checker.validate(&school);
    if violations.is_empty() {
        println!("all hard constraints hold");
        return Ok(());
    }
    println!("{} hard-constraint violations:", violations.len());
    for violation in &violations {
        println!("- {}", violation);
    }
    Err(Error::ConstraintViolation {
        kind: "assignment".to_string(),
        details: format!("{} violations", violations.len()),
    })
}

fn cmd_config(sub: &ArgMatches) -> Result<()> {
    let path = sub
        .get_one::<String>("config")
        .cloned()
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

    match sub.subcommand() {
        Some(("show", _)) => {
            let config = Config::load_or_default(&path)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Some(("set", set_args)) => {
            let key: &String = set_args.get_one("KEY").expect("KEY is required");
            let value: &String = set_args.get_one("VALUE").expect("VALUE is required");
            let mut config = Config::load_or_default(&path)?;
            config.set_key(key, value)?;
            config.save(&path)?;
            info!("{} = {} written to {}", key, value, path);
        }
        Some(("reset", _)) => {
            Config::default().save(&path)?;
            info!("configuration reset to defaults in {}", path);
        }
        Some(("status", _)) => {
            let config = Config::load_or_default(&path)?;
            let diffs = config.diff_from_default();
            if diffs.is_empty() {
                println!("configuration matches the defaults ({})", path);
            } else {
                println!("{} keys differ from the defaults:", diffs.len());
                for (key, current, default) in diffs {
                    println!("  {} = {} (default {})", key, current, default);
                }
            }
        }
        _ => unreachable!("config subcommand is required"),
    }
    Ok(())
}

/// Thin stdin menu over the same operations; the core knows nothing of it.
fn cmd_interactive(sub: &ArgMatches) -> Result<()> {
    let config = load_config(sub)?;
    let stdin = std::io::stdin();
    loop {
        println!();
        println!("classplan interactive menu");
        println!("  [1] score a roster file");
        println!("  [2] optimize a roster file");
        println!("  [3] validate a roster file");
        println!("  [q] quit");
        print!("> ");
        std::io::stdout().flush()?;

        let mut choice = String::new();
        if stdin.read_line(&mut choice)? == 0 {
            return Ok(());
        }
        let choice = choice.trim().to_string();
        if choice == "q" {
            return Ok(());
        }
        if !matches!(choice.as_str(), "1" | "2" | "3") {
            println!("unknown choice '{}'", choice);
            continue;
        }

        print!("roster file: ");
        std::io::stdout().flush()?;
        let mut path = String::new();
        if stdin.read_line(&mut path)? == 0 {
            return Ok(());
        }
        let path = PathBuf::from(path.trim());

        let step = || -> Result<()> {
            let school = table::read_path(&path, &config, false)?;
            match choice.as_str() {
                "1" => {
                    let scores = scoring::score(&school, &config);
                    print_score_summary(&scores);
                }
                "2" => {
                    let mut rng = StdRng::seed_from_u64(0);
                    let checker = Checker::new(&config);
                    let start = if checker.classify(&school)
                        == AssignmentState::FullyAssigned
                    {
                        school
                    } else {
                        let labels = school.labels().to_vec();
                        init::initialize(
                            school.roster(),
                            labels,
                            InitStrategy::default(),
                            &config,
                            &mut rng,
                        )?
                    };
                    let options = CoordinatorOptions::new(
                        Strategy::Single,
                        vec![Algorithm::RandomSwap],
                    );
                    let outcome = coordinator::execute(&start, &config, &options)?;
                    if let Some(run) = outcome.best_run() {
                        println!(
                            "{}: {:.3} -> {:.3} in {} iterations",
                            run.algorithm,
                            run.initial_score,
                            run.best_score,
                            run.iterations_used
                        );
                        print!("{}", io::format_assignment(&run.best_snapshot, None));
                    }
                }
                "3" => {
                    let checker = Checker::new(&config);
                    let violations = checker.validate(&school);
                    if violations.is_empty() {
                        println!("all hard constraints hold");
                    } else {
                        for violation in &violations {
                            println!("- {}", violation);
                        }
                    }
                }
                _ => unreachable!(),
            }
            Ok(())
        };
        if let Err(e) = step() {
            error!("{}", e);
        }
    }
}

// ---------------------------------------------------------------------------
// Argument parsing

fn input_arg() -> Arg {
    Arg::new("INPUT")
        .help("The roster table to read")
        .required(true)
        .index(1)
}

fn common_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        Arg::new("config")
            .long("config")
            .value_name("PATH")
            .help("Configuration file to use instead of the default"),
    )
    .arg(
        Arg::new("log_level")
            .long("log-level")
            .value_name("LEVEL")
            .help("Progress cadence: minimal, normal, detailed or debug"),
    )
    .arg(
        Arg::new("skip_validation")
            .long("skip-validation")
            .help("Normalize invalid cells to safe defaults instead of failing")
            .action(ArgAction::SetTrue),
    )
    .arg(
        Arg::new("min_friends")
            .long("min-friends")
            .value_name("N")
            .help("Hard minimum-friends threshold (0 disables)")
            .value_parser(clap::value_parser!(usize)),
    )
    .arg(
        Arg::new("max_iterations")
            .long("max-iterations")
            .value_name("N")
            .help("Per-algorithm iteration cap")
            .value_parser(clap::value_parser!(usize)),
    )
    .arg(
        Arg::new("early_stop")
            .long("early-stop")
            .value_name("N")
            .help("Consecutive non-improving iterations before early stop")
            .value_parser(clap::value_parser!(usize)),
    )
    .arg(
        Arg::new("target_classes")
            .long("target-classes")
            .value_name("N")
            .help("Number of classes to create (derived from roster size otherwise)")
            .value_parser(clap::value_parser!(usize)),
    )
    .arg(
        Arg::new("random_seed")
            .long("random-seed")
            .value_name("N")
            .help("Base seed for all randomized steps")
            .value_parser(clap::value_parser!(u64)),
    )
}

fn output_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        Arg::new("output")
            .long("output")
            .value_name("PATH")
            .help("Also write the resulting assignment table to this path"),
    )
    .arg(
        Arg::new("print")
            .long("print")
            .short('p')
            .help("Print the assignment in a human readable format")
            .action(ArgAction::SetTrue),
    )
}

fn algorithm_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        Arg::new("algorithm")
            .long("algorithm")
            .value_name("NAME")
            .help(
                "Algorithm to run: random_swap, local_search, simulated_annealing \
                 or evolutionary",
            ),
    )
    .arg(
        Arg::new("algorithms")
            .long("algorithms")
            .value_name("NAMES")
            .num_args(1..)
            .help("Several algorithms, combined according to --strategy"),
    )
    .arg(
        Arg::new("strategy")
            .long("strategy")
            .value_name("STRATEGY")
            .help("How to combine algorithms: single, parallel, sequential or best_of"),
    )
    .arg(
        Arg::new("init_strategy")
            .long("init-strategy")
            .value_name("NAME")
            .help(
                "Starting-assignment strategy: random, balanced, academic_balanced \
                 or constraint_aware",
            ),
    )
}

fn parse_cli_args() -> ArgMatches {
    clap::command!()
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(common_args(
            clap::Command::new("score")
                .about("Evaluate an existing assignment")
                .arg(input_arg())
                .arg(
                    Arg::new("print")
                        .long("print")
                        .short('p')
                        .help("Print the assignment in a human readable format")
                        .action(ArgAction::SetTrue),
                ),
        ))
        .subcommand(algorithm_args(output_args(common_args(
            clap::Command::new("optimize")
                .about("Optimize an assignment with one or more algorithms")
                .arg(input_arg()),
        ))))
        .subcommand(common_args(
            clap::Command::new("baseline")
                .about("Collect the random-swap reference distribution")
                .arg(input_arg())
                .arg(
                    Arg::new("num_runs")
                        .long("num-runs")
                        .value_name("N")
                        .help("Number of independent reference runs")
                        .value_parser(clap::value_parser!(usize)),
                ),
        ))
        .subcommand(output_args(common_args(
            clap::Command::new("generate-assignment")
                .about("Build a fresh starting assignment without optimizing")
                .arg(input_arg())
                .arg(
                    Arg::new("init_strategy")
                        .long("init-strategy")
                        .value_name("NAME")
                        .help(
                            "Starting-assignment strategy: random, balanced, \
                             academic_balanced or constraint_aware",
                        ),
                ),
        )))
        .subcommand(common_args(
            clap::Command::new("validate")
                .about("Check a roster and its assignment against the hard constraints")
                .arg(input_arg()),
        ))
        .subcommand(
            clap::Command::new("config")
                .about("Inspect or edit the configuration document")
                .subcommand_required(true)
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_name("PATH")
                        .help("Configuration file to operate on"),
                )
                .subcommand(
                    clap::Command::new("show").about("Print the effective configuration"),
                )
                .subcommand(
                    clap::Command::new("set")
                        .about("Set a single value by dotted key")
                        .arg(Arg::new("KEY").required(true).index(1))
                        .arg(Arg::new("VALUE").required(true).index(2)),
                )
                .subcommand(clap::Command::new("reset").about("Write the defaults"))
                .subcommand(
                    clap::Command::new("status")
                        .about("Show keys that differ from the defaults"),
                ),
        )
        .subcommand(common_args(
            clap::Command::new("interactive").about("Menu-driven operation"),
        ))
        .get_matches()
}
