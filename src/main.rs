use std::io::{self, BufRead, Write};

use clap::Parser;
use isoprobe::shell::{Outcome, Shell};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// ISO-9660 image (logical .iso or raw disc dump) to load at startup
    image: Option<String>,
}

fn main() -> io::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut shell = Shell::new();
    match &args.image {
        Some(image) => shell.load_image(image),
        None => println!("Please LOAD a disk to continue"),
    }

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("{}> ", shell.prompt());
        io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        if line.trim().is_empty() {
            println!("Try again!");
            continue;
        }
        if shell.execute(&line) == Outcome::Exit {
            break;
        }
    }
    Ok(())
}
