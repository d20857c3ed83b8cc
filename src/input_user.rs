use std::path::{Path, PathBuf};

use clap::{App, Arg, ArgMatches};
use colored::Colorize;

use crate::executor::path_selection::PathSelectionPolicy;
use crate::executor::symbolic_setting::{load_setting_from_json, TestBackend, TestgenSetting};

/// Command-line input of the test generator.
pub struct Input {
    pub input_program: PathBuf,
    pub output_file: Option<PathBuf>,
    pub target: String,
    pub flag_print_tests: bool,
    pub setting: TestgenSetting,
}

impl Input {
    pub fn new() -> Result<Input, ()> {
        let matches = view();
        Self::from_matches(&matches)
    }

    pub fn from_matches(matches: &ArgMatches<'_>) -> Result<Input, ()> {
        let input_program = PathBuf::from(matches.value_of("input").unwrap_or("./program.json"));
        if !Path::new(&input_program).is_file() {
            eprintln!(
                "{} {}",
                "Program file does not exist:".red(),
                input_program.display()
            );
            return Err(());
        }

        let mut setting = match matches.value_of("setting") {
            Some(path) => load_setting_from_json(path).map_err(|e| {
                eprintln!("{} {}", "Malformed setting file:".red(), e);
            })?,
            None => TestgenSetting::default(),
        };

        if let Some(backend) = matches.value_of("backend") {
            setting.backend = parse_flag::<TestBackend>(backend)?;
        }
        if let Some(policy) = matches.value_of("path_selection") {
            setting.path_selection = parse_flag::<PathSelectionPolicy>(policy)?;
        }
        if let Some(seed) = matches.value_of("seed") {
            setting.seed = parse_flag::<u64>(seed)?;
        }
        if let Some(max_tests) = matches.value_of("max_tests") {
            setting.max_tests = parse_flag::<usize>(max_tests)?;
        }
        if let Some(size) = matches.value_of("max_packet_size") {
            setting.max_packet_size = parse_flag::<u64>(size)?;
        }

        Ok(Input {
            input_program,
            output_file: matches.value_of("output").map(PathBuf::from),
            target: matches.value_of("target").unwrap_or("bmv2").to_string(),
            flag_print_tests: matches.is_present("print_tests"),
            setting,
        })
    }

    pub fn input_program(&self) -> &Path {
        &self.input_program
    }

    pub fn output_file(&self) -> Option<&Path> {
        self.output_file.as_deref()
    }
}

fn parse_flag<T>(value: &str) -> Result<T, ()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| {
        eprintln!("{} {}", "Invalid argument:".red(), e);
    })
}

pub fn build_app<'a, 'b>() -> App<'a, 'b> {
    App::new("p4testgen")
        .version(crate_version())
        .about("Symbolic test generator for P4 programs")
        .arg(
            Arg::with_name("input")
                .multiple(false)
                .default_value("./program.json")
                .help("Path to the JSON encoding of the program under test"),
        )
        .arg(
            Arg::with_name("setting")
                .long("setting")
                .takes_value(true)
                .display_order(10)
                .help("Path to a JSON file with the test generation setting"),
        )
        .arg(
            Arg::with_name("target")
                .long("target")
                .takes_value(true)
                .default_value("bmv2")
                .possible_values(&["bmv2", "v1model", "core"])
                .display_order(20)
                .help("Architecture the program is compiled for"),
        )
        .arg(
            Arg::with_name("backend")
                .long("test-backend")
                .takes_value(true)
                .possible_values(&["stf", "ptf", "protobuf"])
                .display_order(30)
                .help("Test back end the generated tests are meant for"),
        )
        .arg(
            Arg::with_name("path_selection")
                .long("path-selection")
                .takes_value(true)
                .display_order(40)
                .help("Path selection policy: dfs, random, greedy or max_coverage"),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .takes_value(true)
                .display_order(50)
                .help("Seed of the random path selection"),
        )
        .arg(
            Arg::with_name("max_tests")
                .long("max-tests")
                .takes_value(true)
                .display_order(60)
                .help("Stop after this many tests, 0 for no limit"),
        )
        .arg(
            Arg::with_name("max_packet_size")
                .long("max-packet-size")
                .takes_value(true)
                .display_order(70)
                .help("Largest input packet to generate, in bits"),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .display_order(80)
                .help("Write the generated tests to this file instead of stdout"),
        )
        .arg(
            Arg::with_name("print_tests")
                .long("print-tests")
                .takes_value(false)
                .display_order(90)
                .help("Print a summary of every generated test to stderr"),
        )
}

fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

fn view() -> ArgMatches<'static> {
    build_app().get_matches()
}
