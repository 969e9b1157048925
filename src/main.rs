use std::fs;
use std::process;

use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command};

use evl::eval::{AbortFlag, Strategy};
use evl::repl::Repl;
use evl::session::{Action, Output, Request, Response, Session, Status};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One command-line operation, kept in command-line order.
enum Op {
    Load(String),
    Eval(String),
    Convert(String),
}

fn cli() -> Command {
    Command::new("evl")
        .version(VERSION)
        .about("EVL - an educational Lisp with six interchangeable evaluators")
        .arg(strategy_flag("plainrec", "Use the plain recursive evaluator"))
        .arg(strategy_flag("cps", "Use the closure-passing evaluator"))
        .arg(strategy_flag("oocps", "Use the object-oriented CPS evaluator"))
        .arg(strategy_flag("sboocps", "Use the stack-based OO-CPS evaluator"))
        .arg(strategy_flag("trampoline", "Use the trampoline evaluator"))
        .arg(strategy_flag(
            "trampolinepp",
            "Use the preprocessing trampoline evaluator (default)",
        ))
        .group(
            ArgGroup::new("strategy")
                .args(["plainrec", "cps", "oocps", "sboocps", "trampoline", "trampolinepp"])
                .multiple(false),
        )
        .arg(
            Arg::new("load")
                .short('l')
                .value_name("FILE")
                .action(ArgAction::Append)
                .help("Load and evaluate an EVL file"),
        )
        .arg(
            Arg::new("eval")
                .short('e')
                .value_name("FORM")
                .action(ArgAction::Append)
                .help("Evaluate a form and print its values"),
        )
        .arg(
            Arg::new("convert")
                .long("convert")
                .value_name("FILE")
                .action(ArgAction::Append)
                .help("Convert an EVL file to XML and print it"),
        )
}

fn strategy_flag(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name).long(name).action(ArgAction::SetTrue).help(help)
}

fn selected_strategy(matches: &ArgMatches) -> Strategy {
    for strategy in Strategy::ALL {
        if matches.get_flag(strategy.name()) {
            return strategy;
        }
    }
    Strategy::TrampolinePp
}

/// Collects `-l`/`-e`/`--convert` occurrences in the order they appeared
/// on the command line.
fn collect_ops(matches: &ArgMatches) -> Vec<Op> {
    let mut ops: Vec<(usize, Op)> = Vec::new();
    for (name, build) in [
        ("load", Op::Load as fn(String) -> Op),
        ("eval", Op::Eval as fn(String) -> Op),
        ("convert", Op::Convert as fn(String) -> Op),
    ] {
        if let (Some(indices), Some(values)) = (
            matches.indices_of(name),
            matches.get_many::<String>(name),
        ) {
            for (index, value) in indices.zip(values) {
                ops.push((index, build(value.clone())));
            }
        }
    }
    ops.sort_by_key(|(index, _)| *index);
    ops.into_iter().map(|(_, op)| op).collect()
}

/// Prints the error message to standard output and exits nonzero, per
/// the command-line contract.
fn fail(response: &Response) -> ! {
    match &response.output {
        Some(Output::Text(message)) => println!("{}", message),
        _ => println!("{:?}", response.status),
    }
    process::exit(1);
}

fn expect_success(response: Response) -> Response {
    if matches!(response.status, Status::Success | Status::FoundNoForm) {
        response
    } else {
        fail(&response)
    }
}

fn main() {
    env_logger::init();

    let matches = cli().get_matches();
    let strategy = selected_strategy(&matches);
    let ops = collect_ops(&matches);

    if ops.is_empty() {
        Repl::new(strategy).run();
        return;
    }

    let mut session = Session::new();
    let mut next_id = 0u64;
    let mut request = |session: &mut Session, action: Action| {
        let id = next_id;
        next_id += 1;
        session.handle(Request { id, action })
    };

    expect_success(request(
        &mut session,
        Action::Initialize {
            abort: AbortFlag::new(),
            strategy,
            files: Vec::new(),
        },
    ));

    for op in ops {
        match op {
            Op::Load(path) => {
                let source = match fs::read_to_string(&path) {
                    Ok(source) => source,
                    Err(error) => {
                        println!("cannot read {}: {}", path, error);
                        process::exit(1);
                    }
                };
                expect_success(
                    request(&mut session, Action::EvaluateAllForms { source }),
                );
            }
            Op::Eval(form) => {
                let response = expect_success(request(
                    &mut session,
                    Action::EvaluateAllForms { source: form },
                ));
                if let Some(Output::Values(values)) = response.output {
                    for value in values {
                        println!("{}", value);
                    }
                }
            }
            Op::Convert(path) => {
                let source = match fs::read_to_string(&path) {
                    Ok(source) => source,
                    Err(error) => {
                        println!("cannot read {}: {}", path, error);
                        process::exit(1);
                    }
                };
                let response = expect_success(request(
                    &mut session,
                    Action::ConvertEvlToXml { source },
                ));
                if let Some(Output::Text(xml)) = response.output {
                    println!("{}", xml);
                }
            }
        }
    }
}
