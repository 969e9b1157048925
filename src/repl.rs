//! Interactive REPL for EVL.
//!
//! Multi-line input detection reuses the core's own judgement: a buffer
//! the reader answers with "no complete form yet" keeps accumulating.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::eval::{AbortFlag, Strategy};
use crate::session::{Action, Output, Request, Response, Session, Status};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const HISTORY_FILE: &str = ".evl-history";

pub struct Repl {
    session: Session,
    strategy: Strategy,
    next_id: u64,
}

enum CommandResult {
    Print(String),
    Clear,
    Quit,
}

impl Repl {
    pub fn new(strategy: Strategy) -> Self {
        let mut repl = Repl { session: Session::new(), strategy, next_id: 0 };
        repl.request(Action::Initialize {
            abort: AbortFlag::new(),
            strategy,
            files: Vec::new(),
        });
        repl
    }

    fn request(&mut self, action: Action) -> Response {
        let id = self.next_id;
        self.next_id += 1;
        self.session.handle(Request { id, action })
    }

    /// Whether the buffered input still lacks a complete form: reading
    /// it runs into the end of the input. Reading does not evaluate, so
    /// the probe has no side effects.
    fn is_incomplete(&self, input: &str) -> bool {
        let mut reader = crate::reader::Reader::new(input);
        loop {
            match reader.read() {
                Ok(Some(_)) => continue,
                Ok(None) => return false,
                Err(error) => return error.means_no_form_yet(),
            }
        }
    }

    fn handle_command(&mut self, command: &str) -> Option<CommandResult> {
        match command.trim() {
            ":help" | ":h" | ":?" => Some(CommandResult::Print(self.help_message())),
            ":clear" | ":cls" => Some(CommandResult::Clear),
            ":quit" | ":exit" | ":q" => Some(CommandResult::Quit),
            _ => None,
        }
    }

    fn help_message(&self) -> String {
        format!(
            r#"{}

{}
  :help, :h, :?     Show this help message
  :clear, :cls      Clear the screen
  :quit, :exit, :q  Exit the REPL

{}
  (_+ 1 2)              => 3
  (fset! + (fref _+))   => #<primitive _+>
  (vset! x 42)          => 42
"#,
            format!("EVL REPL v{} ({})", VERSION, self.strategy.name()).bold(),
            "Commands:".yellow().bold(),
            "Examples:".yellow().bold()
        )
    }

    fn print_welcome(&self) {
        println!(
            "{}",
            format!("EVL v{} - {} evaluator", VERSION, self.strategy.name()).cyan()
        );
        println!(
            "Type {} for help, {} to exit.\n",
            ":help".yellow(),
            ":quit".yellow()
        );
    }

    fn print_response(&self, response: Response) {
        match response.status {
            Status::Success => match response.output {
                Some(Output::Values(values)) => {
                    for value in values {
                        println!("{}", self.colorize(&value));
                    }
                }
                Some(Output::Text(text)) => println!("{}", text),
                None => {}
            },
            Status::FoundNoForm => {}
            Status::Aborted => println!("{}", "Aborted".red()),
            Status::Terminated => println!("{}", "Terminated".red()),
            Status::Error => match response.output {
                Some(Output::Text(message)) => {
                    eprintln!("{} {}", "Error:".red().bold(), message)
                }
                _ => eprintln!("{}", "Error".red().bold()),
            },
        }
    }

    fn colorize(&self, output: &str) -> String {
        if output == "#v" {
            return output.dimmed().to_string();
        }
        if output == "#t" {
            return output.green().to_string();
        }
        if output == "#f" {
            return output.red().to_string();
        }
        if output.starts_with("#<") {
            return output.magenta().to_string();
        }
        if output.starts_with(':') {
            return output.yellow().to_string();
        }
        if output.starts_with('"') {
            return output.green().to_string();
        }
        if output.parse::<f64>().is_ok() {
            return output.blue().to_string();
        }
        output.to_string()
    }

    pub fn run(&mut self) {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(error) => {
                eprintln!("{}: {}", "Cannot start the REPL".red(), error);
                return;
            }
        };
        let _ = rl.load_history(HISTORY_FILE);

        self.print_welcome();

        let mut input_buffer = String::new();

        'repl_loop: loop {
            let prompt = if input_buffer.is_empty() {
                format!("{}> ", "evl".green())
            } else {
                format!("{} ", "..".dimmed())
            };

            match rl.readline(&prompt) {
                Ok(line) => {
                    if input_buffer.is_empty() && line.trim_start().starts_with(':') {
                        let _ = rl.add_history_entry(line.as_str());
                        if let Some(result) = self.handle_command(&line) {
                            match result {
                                CommandResult::Print(message) => {
                                    println!("{}", message)
                                }
                                CommandResult::Clear => {
                                    print!("\x1B[2J\x1B[1;1H");
                                    self.print_welcome();
                                }
                                CommandResult::Quit => break 'repl_loop,
                            }
                            continue 'repl_loop;
                        }
                    }

                    if !input_buffer.is_empty() {
                        input_buffer.push('\n');
                    }
                    input_buffer.push_str(&line);

                    if input_buffer.trim().is_empty() {
                        input_buffer.clear();
                        continue 'repl_loop;
                    }
                    if self.is_incomplete(&input_buffer) {
                        continue 'repl_loop;
                    }

                    let _ = rl.add_history_entry(input_buffer.as_str());
                    let _ = rl.save_history(HISTORY_FILE);

                    let source = std::mem::take(&mut input_buffer);
                    let response =
                        self.request(Action::EvaluateAllForms { source });
                    self.print_response(response);
                }
                Err(ReadlineError::Interrupted) => {
                    if !input_buffer.is_empty() {
                        println!("{}", "Input cancelled".dimmed());
                        input_buffer.clear();
                    }
                    continue 'repl_loop;
                }
                Err(ReadlineError::Eof) => break 'repl_loop,
                Err(error) => {
                    eprintln!("{}: {:?}", "Error".red(), error);
                    break 'repl_loop;
                }
            }
        }

        println!("\n{}", "Goodbye!".cyan());
    }
}
