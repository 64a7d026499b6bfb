//! Othello self-play driver
//!
//! Plays the search engine against itself and prints every move with its
//! search statistics. Useful for eyeballing strength and speed.
//!
//! Usage: selfplay [--black easy|medium|hard] [--white ...] [--seed N]
//!                 [--max-nodes N] [--max-millis N] [--games N]

use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use othello_ai::{Difficulty, SearchConfig, SearchEngine};
use othello_core::{GameEngine, Player, Winner};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

struct Options {
    black: Difficulty,
    white: Difficulty,
    seed: u64,
    games: u32,
    search: SearchConfig,
}

fn parse_args() -> Result<Options, String> {
    let mut opts = Options {
        black: Difficulty::Hard,
        white: Difficulty::Medium,
        seed: 0,
        games: 1,
        search: SearchConfig::default(),
    };

    let args: Vec<String> = env::args().skip(1).collect();
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let value = iter
            .next()
            .ok_or_else(|| format!("missing value for {}", flag))?;
        match flag.as_str() {
            "--black" => opts.black = value.parse()?,
            "--white" => opts.white = value.parse()?,
            "--seed" => opts.seed = value.parse().map_err(|e| format!("--seed: {}", e))?,
            "--games" => opts.games = value.parse().map_err(|e| format!("--games: {}", e))?,
            "--max-nodes" => {
                opts.search.max_nodes = value.parse().map_err(|e| format!("--max-nodes: {}", e))?
            }
            "--max-millis" => {
                opts.search.max_millis = value.parse().map_err(|e| format!("--max-millis: {}", e))?
            }
            other => return Err(format!("unknown argument: {}", other)),
        }
    }
    Ok(opts)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let opts = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(2);
        }
    };

    println!("Othello self-play");
    println!("=================");
    println!("Black: {}  White: {}  seed: {}", opts.black, opts.white, opts.seed);
    println!(
        "Budget: {} nodes, {} ms per move\n",
        opts.search.max_nodes, opts.search.max_millis
    );

    // Ctrl-C cancels the search in progress and stops after the current game.
    let running = Arc::new(AtomicBool::new(true));
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let running = running.clone();
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            println!("\nInterrupt received, stopping...");
            running.store(false, Ordering::SeqCst);
            cancel.store(true, Ordering::SeqCst);
        }) {
            eprintln!("warning: could not install Ctrl-C handler: {}", e);
        }
    }

    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut engine = SearchEngine::new(opts.search).with_cancel_flag(cancel);
    let mut tally = [0u32; 3];
    let start = Instant::now();

    for game_no in 1..=opts.games {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let mut game = GameEngine::new();
        println!("Game {}\n{}", game_no, game.board());

        while !game.is_game_over() && running.load(Ordering::SeqCst) {
            let state = game.state();
            let difficulty = match state.current_player {
                Player::Black => opts.black,
                Player::White => opts.white,
            };
            let report = engine.search(&state, difficulty, &mut rng);
            let Some(mv) = report.best_move else {
                break;
            };
            let result = match game.make_move(state.current_player, mv) {
                Ok(result) => result,
                Err(e) => {
                    eprintln!("engine produced a rejected move: {}", e);
                    process::exit(1);
                }
            };
            println!(
                "{:>2}. {} {} score={} flipped={} | {}",
                game.moves_played(),
                state.current_player,
                mv,
                report.score,
                result.flipped.count_ones(),
                report.stats
            );
            if let Some(passed) = result.passed {
                println!("    {} passes", passed);
            }
        }

        println!("\n{}", game.board());
        let board = game.board();
        match game.winner() {
            Some(Winner::Black) => tally[0] += 1,
            Some(Winner::White) => tally[1] += 1,
            Some(Winner::Draw) => tally[2] += 1,
            None => {
                println!("Game {} interrupted.", game_no);
                continue;
            }
        }
        println!(
            "Result: {:?} ({}-{})\n",
            game.winner(),
            board.count(Player::Black),
            board.count(Player::White)
        );
    }

    println!("=================");
    println!(
        "Black ({}) {}  White ({}) {}  Draws {}",
        opts.black, tally[0], opts.white, tally[1], tally[2]
    );
    println!("Time: {:.2}s", start.elapsed().as_secs_f64());
}
