use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, WrapErr};
use rexpr::*;
use std::path::PathBuf;
use std::{
    fs,
    io::{self, Write},
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Tokenize { filename: PathBuf },
    Parse { filename: PathBuf },
    Run { filename: PathBuf },
    Repl,
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Tokenize { filename } => {
            let file_contents = fs::read_to_string(&filename)
                .into_diagnostic()
                .wrap_err_with(|| format!("reading '{}' failed", filename.display()))?;

            for token in Lexer::new(&file_contents) {
                println!("{:?}", token);
            }
        }
        Commands::Parse { filename } => {
            let file_contents = fs::read_to_string(&filename)
                .into_diagnostic()
                .wrap_err_with(|| format!("reading '{}' failed", filename.display()))?;

            match parse(&file_contents) {
                Ok(expr) => println!("{expr:?}"),
                Err(e) => eprintln!("{e:?}"),
            }
        }
        Commands::Run { filename } => {
            let file_contents = fs::read_to_string(&filename)
                .into_diagnostic()
                .wrap_err_with(|| format!("reading '{}' failed", filename.display()))?;

            let env = Environment::new();
            let live = run(&file_contents, &env)?;
            match live.error() {
                Some(err) => eprintln!("{err}"),
                None => println!("{}", live.value()),
            }
        }
        Commands::Repl => {
            let env = Environment::new();
            loop {
                print!("expr> ");
                io::stdout().flush().unwrap();

                let mut input = String::new();
                let bytes = io::stdin().read_line(&mut input).expect("unexpected input");
                if bytes == 0 {
                    break;
                }
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }
                if input.eq_ignore_ascii_case("exit") {
                    break;
                }

                match run(input, &env) {
                    Ok(live) => match live.error() {
                        Some(err) => eprintln!("{err}"),
                        None => println!("{}", live.value()),
                    },
                    Err(e) => eprintln!("{e:?}"),
                }
            }
        }
    }

    Ok(())
}
