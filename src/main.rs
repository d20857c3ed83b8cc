use std::fs::File;
use std::io::{self, Write};
use std::time;

use colored::Colorize;
use log::{debug, info};

use p4testgen::executor::symbolic_executor::{AbstractTest, SymbolicExecutor};
use p4testgen::input_user::Input;
use p4testgen::ir::program::ProgramInfo;
use p4testgen::solver::BruteForceSolver;
use p4testgen::targets::get_target;

fn display_p4testgen_header() {
    let logo = r#"
          p4testgen
   P4 Symbolic Test Generator
    "#;

    eprintln!("{}", logo.bright_cyan().bold());
    eprintln!("{}", "Welcome to p4testgen".green().bold());
    eprintln!("{}", "══════════════════════════════════".green());
}

fn main() {
    display_p4testgen_header();

    let code = match start() {
        Ok(()) => {
            eprintln!("{}", "Everything went okay".green());
            exitcode::OK
        }
        Err(code) => {
            eprintln!("{}", "previous errors were found".red());
            code
        }
    };
    std::process::exit(code);
}

fn print_test_summary(test: &AbstractTest) {
    eprintln!(
        "{} {}: {} input bits, {} output fields, exception {}",
        "🧪 Test".bright_yellow(),
        test.id,
        test.input_packet_bits,
        test.output_packet.len(),
        test.exception
            .map(|e| format!("{:?}", e))
            .unwrap_or_else(|| "none".to_string())
    );
    for event in &test.trace {
        eprintln!("    {}", event);
    }
}

fn write_tests(tests: &[AbstractTest], user_input: &Input) -> io::Result<()> {
    let json = serde_json::to_string_pretty(tests)?;
    match user_input.output_file() {
        Some(path) => {
            let mut file = File::create(path)?;
            writeln!(file, "{}", json)?;
            eprintln!(
                "{} {}",
                "💾 Tests written to".green(),
                path.display().to_string().bright_yellow()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn start() -> Result<(), exitcode::ExitCode> {
    let start_time = time::Instant::now();
    let user_input = Input::new().map_err(|_| exitcode::USAGE)?;

    env_logger::init();

    eprintln!("{}", "📦 Loading Program...".green());
    let program = ProgramInfo::from_json_file(&user_input.input_program().to_string_lossy())
        .map_err(|e| {
            eprintln!("{} {}", "Failed to load the program:".red(), e);
            exitcode::DATAERR
        })?;
    debug!(
        "{} statements, {} tables, {} actions",
        program.statement_count(),
        program.tables.len(),
        program.actions.len()
    );

    let target = get_target(&user_input.target).ok_or_else(|| {
        eprintln!("{} {}", "Unknown target:".red(), user_input.target);
        exitcode::USAGE
    })?;
    info!("\n{}", user_input.setting);

    eprintln!("{}", "🔍 Exploring Paths...".green());
    let solver = Box::new(BruteForceSolver::new(&user_input.setting));
    let mut executor =
        SymbolicExecutor::new(&program, target.as_ref(), &user_input.setting, solver);
    let tests = executor.run().map_err(|e| {
        eprintln!("{} {}", "Test generation failed:".red(), e);
        exitcode::SOFTWARE
    })?;

    if user_input.flag_print_tests {
        for test in tests {
            print_test_summary(test);
        }
    }
    write_tests(tests, &user_input).map_err(|e| {
        eprintln!("{} {}", "Failed to write the tests:".red(), e);
        exitcode::IOERR
    })?;

    eprintln!("{}", "══════════════════════════════════".green());
    let stats = &executor.stats;
    eprintln!(
        "{} {} tests, {} finished paths, {} abandoned, {} infeasible branches",
        "📊 Summary:".bright_cyan(),
        executor.tests.len(),
        stats.finished_paths,
        stats.abandoned_paths,
        stats.infeasible_branches
    );
    eprintln!(
        "    statement coverage {:.1}%, {} distinct paths, {:?}",
        executor.coverage.statement_coverage() * 100.0,
        executor.coverage.coverage_count(),
        start_time.elapsed()
    );
    Ok(())
}
