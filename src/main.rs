use std::env;
use std::fs;
use std::process;

use crossfill::{render_grid, solve, Puzzle, WordList};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 || args.len() > 4 {
        eprintln!("Usage: crossfill STRUCTURE WORDS [OUTPUT]");
        process::exit(2);
    }

    let structure = fs::read_to_string(&args[1]).expect("Failed to read the structure file");
    let dictionary = fs::read_to_string(&args[2]).expect("Failed to read the word list");

    let puzzle = match Puzzle::from_template(&structure) {
        Ok(puzzle) => puzzle,
        Err(message) => {
            eprintln!("Bad structure file: {}", message);
            process::exit(2);
        }
    };
    let words = WordList::parse(&dictionary);

    match solve(&puzzle, &words) {
        Some(solution) => {
            let grid = render_grid(&puzzle, &words, &solution.choices);
            print!("{}", grid);
            eprintln!("{:?}", solution.statistics);

            if let Some(output) = args.get(3) {
                fs::write(output, &grid).expect("Unable to write the output file");
            }
        }
        None => println!("No solution."),
    }
}
