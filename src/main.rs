use std::{
    io::{self, BufRead, Read, Write},
    process::exit,
};

use structopt::{clap, StructOpt};

use calx::{make_state, Source, State};

#[derive(StructOpt, Debug)]
#[structopt(
    name = "calx",
    about = "A scripting language with arbitrary-precision decimal arithmetic."
)]
struct Opt {
    /// Execute CODE instead of reading a file
    #[structopt(short = "c", value_name = "CODE")]
    code: Option<String>,

    /// Script to run ("-" reads standard input); no file
    /// starts the interactive prompt
    #[structopt(value_name = "FILE")]
    files: Vec<String>,
}

fn print_usage() {
    eprintln!("USAGE: calx");
    eprintln!("       calx FILE");
    eprintln!("       calx -c CODE");
}

fn usage_error(msg: &str) -> ! {
    eprintln!("Usage error: {}", msg);
    print_usage();
    exit(2);
}

/// Compiles and evaluates one source; reports errors.
fn run_source(state: &mut State, contents: &str, origin: &str) -> bool {
    let source = Source::new(contents, origin);
    match calx::compile(state, source.clone()) {
        Ok(func) => state.eval(func).is_some(),
        Err(e) => {
            e.report(&mut io::stderr().lock(), &source).ok();
            false
        }
    }
}

fn inline_mode(code: &str) -> bool {
    let mut state = make_state();
    run_source(&mut state, code, "('-c' argument)")
}

fn file_mode(path: &str) -> bool {
    let mut state = make_state();

    let (contents, origin) = if path == "-" {
        let mut contents = String::new();
        if let Err(e) = io::stdin().lock().read_to_string(&mut contents) {
            eprintln!("(stdin): {}", e);
            return false;
        }
        (contents, "(stdin)".to_string())
    } else {
        match std::fs::read_to_string(path) {
            Ok(contents) => (contents, path.to_string()),
            Err(e) => {
                eprintln!("{}: {}", path, e);
                return false;
            }
        }
    };

    run_source(&mut state, &contents, &origin)
}

fn maybe_load_rc(state: &mut State) {
    let Some(root) = state.module_root.clone() else {
        return;
    };
    let path = root.join("rc.calx");
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            run_source(state, &contents, &path.to_string_lossy());
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => eprintln!("{}: {}", path.display(), e),
    }
}

fn read_prompted_line(prompt: &str) -> Option<String> {
    print!("{}", prompt);
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => {
            eprintln!();
            None
        }
        Ok(_) => {
            if line.ends_with('\n') {
                line.pop();
            }
            Some(line)
        }
    }
}

fn interactive_mode() {
    let mut state = make_state();
    maybe_load_rc(&mut state);

    while let Some(line) = read_prompted_line("\u{2248}\u{2248}> ") {
        let mut buf = line;
        loop {
            let source = Source::new(&buf, "(input)");
            match calx::compile(&mut state, source.clone()) {
                Ok(func) => {
                    // evaluate; the result is discarded
                    state.eval(func);
                    break;
                }
                Err(e) if e.need_more => {
                    // recoverable: ask for a continuation
                    match read_prompted_line("\u{00d7}\u{22c5}\u{22c5}\u{22c5}> ") {
                        Some(cont) => {
                            buf.push('\n');
                            buf.push_str(&cont);
                        }
                        None => break,
                    }
                }
                Err(e) => {
                    e.report(&mut io::stderr().lock(), &source).ok();
                    break;
                }
            }
        }
    }
}

fn main() {
    let opt = match Opt::from_iter_safe(std::env::args()) {
        Ok(opt) => opt,
        Err(e)
            if e.kind == clap::ErrorKind::HelpDisplayed
                || e.kind == clap::ErrorKind::VersionDisplayed =>
        {
            println!("{}", e.message);
            exit(0);
        }
        Err(e) => {
            eprintln!("{}", e.message);
            print_usage();
            exit(2);
        }
    };

    if opt.files.len() > 1 {
        usage_error("multiple positional arguments.");
    }
    if opt.code.is_some() && !opt.files.is_empty() {
        usage_error("'-c' and file argument are mutually exclusive.");
    }

    let ok = if let Some(code) = opt.code {
        inline_mode(&code)
    } else if let Some(path) = opt.files.first() {
        file_mode(path)
    } else {
        interactive_mode();
        true
    };
    exit(if ok { 0 } else { 1 });
}
