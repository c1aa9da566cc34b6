use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use synthctl_core::banks;
use synthctl_core::{paths, Config, Engine, PresetFavorites, ReplyStatus};
use synthctl_types::{Preset, ProcessorId};

fn init_logging(level: log::LevelFilter) {
    use simplelog::{Config as LogConfig, WriteLogger};

    let log_path = paths::config_dir().join("synthctl.log");
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = match File::create(&log_path).or_else(|_| File::create("/tmp/synthctl.log")) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("synthctl: cannot create log file: {}", e);
            return;
        }
    };
    if let Err(e) = WriteLogger::init(level, LogConfig::default(), log_file) {
        eprintln!("synthctl: logger already initialised: {}", e);
    }
    log::info!("synthctl starting (log level: {:?})", level);
}

fn usage() {
    eprintln!("usage: synthctl [-v|--verbose] [--list] [--channel N] [--part N] ENGINE");
}

fn main() -> io::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");
    let config = Config::load();
    init_logging(if verbose { log::LevelFilter::Debug } else { config.log_level() });

    if args.iter().any(|a| a == "--list") {
        for engine in config.engines() {
            println!("{:<16} {:<4} {}", engine.name, engine.nickname(), engine.command);
        }
        return Ok(());
    }

    let flag_value = |flag: &str| -> Option<u32> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .and_then(|v| v.parse().ok())
    };
    let channel = flag_value("--channel").and_then(|c| u8::try_from(c).ok());
    let part_index = flag_value("--part");

    let mut skip_next = false;
    let engine_name = args.iter().find(|a| {
        if std::mem::take(&mut skip_next) {
            return false;
        }
        if *a == "--channel" || *a == "--part" {
            skip_next = true;
            return false;
        }
        !a.starts_with('-')
    });
    let Some(engine_name) = engine_name else {
        usage();
        std::process::exit(2);
    };
    let Some(engine_config) = config.engine(engine_name) else {
        eprintln!("synthctl: unknown engine {:?} (try --list)", engine_name);
        std::process::exit(2);
    };

    let mut engine = match Engine::from_config(engine_config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("synthctl: {}", e);
            std::process::exit(1);
        }
    };
    let pid = engine.add_processor(channel.or(Some(0)), part_index);
    if let Some(proc) = engine.processor(pid) {
        for (symbol, err) in &proc.last_build().skipped {
            eprintln!("synthctl: skipped controller {}: {}", symbol, err);
        }
    }

    match engine.start() {
        Ok(reply) => {
            print!("{}", reply.output);
            if reply.status == ReplyStatus::TimedOut {
                eprintln!("synthctl: no prompt from {} yet", engine.name());
            }
        }
        Err(e) => {
            eprintln!("synthctl: {}", e);
            std::process::exit(1);
        }
    }

    let my_data = config.my_data_dir();
    let mut favorites = PresetFavorites::for_engine(&my_data, engine.nickname());
    let bank_roots = vec![
        ("_".to_string(), config.data_dir().join(engine.nickname())),
        ("my".to_string(), my_data.join(engine.nickname())),
    ];

    print_screens(&engine, pid);
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(meta) = line.strip_prefix(':') {
            if !run_meta(&mut engine, pid, meta, favorites.as_mut(), &bank_roots) {
                break;
            }
            continue;
        }
        match engine.send_command(line) {
            Ok(reply) => {
                print!("{}", reply.output);
                match reply.status {
                    ReplyStatus::TimedOut => eprintln!("(timed out)"),
                    ReplyStatus::Exited => {
                        eprintln!("synthctl: {} exited", engine.name());
                        break;
                    }
                    _ => {}
                }
            }
            Err(e) => eprintln!("synthctl: {}", e),
        }
        stdout.flush()?;
    }

    engine.stop();
    Ok(())
}

/// Handle a `:command` line. Returns false to quit.
fn run_meta(
    engine: &mut Engine,
    pid: ProcessorId,
    line: &str,
    favorites: Option<&mut PresetFavorites>,
    bank_roots: &[(String, PathBuf)],
) -> bool {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        ["quit"] | ["q"] => return false,
        ["screens"] => print_screens(engine, pid),
        ["set", symbol, value] => match value.parse::<f32>() {
            Ok(v) => match engine.set_controller_value(pid, symbol, v) {
                Some(stored) => println!("{} = {}", symbol, stored),
                None => eprintln!("no controller {:?}", symbol),
            },
            Err(_) => eprintln!("bad value {:?}", value),
        },
        ["cc", ch, cc, value] => match (ch.parse(), cc.parse(), value.parse()) {
            (Ok(ch), Ok(cc), Ok(value)) => {
                let n = engine.dispatch_cc(ch, cc, value);
                println!("{} controller(s) updated", n);
            }
            _ => eprintln!("usage: :cc CHANNEL CC VALUE"),
        },
        ["channels"] => match engine.active_midi_channels() {
            Some(channels) => println!("{:?}", channels),
            None => println!("all"),
        },
        ["health"] => match engine.check_health() {
            Some(exit) => println!("{}", exit),
            None => println!("{}", engine.state()),
        },
        ["presets", ext] => {
            for entry in banks::list_files(bank_roots, ext) {
                println!("{:>3} {}", entry.index, entry.title);
            }
        }
        ["fav"] => match favorites {
            Some(favs) => {
                for entry in favs.list() {
                    println!("{} ({})", entry.preset.title, entry.preset.id);
                }
            }
            None => eprintln!("favourites unavailable"),
        },
        ["fav", id] => match favorites {
            Some(favs) => match favs.toggle(&Preset::new(*id, *id)) {
                Ok(true) => println!("added {}", id),
                Ok(false) => println!("removed {}", id),
                Err(e) => eprintln!("synthctl: {}", e),
            },
            None => eprintln!("favourites unavailable"),
        },
        _ => eprintln!(
            "commands: :screens :set SYM VAL :cc CH CC VAL :channels :health :presets EXT :fav [ID] :quit"
        ),
    }
    true
}

fn print_screens(engine: &Engine, pid: ProcessorId) {
    let (Some(screens), Some(set)) = (engine.screens(pid), engine.controllers(pid)) else {
        return;
    };
    for screen in screens {
        println!("[{}]", screen.title);
        for symbol in &screen.symbols {
            let Some(ctrl) = set.get(symbol) else {
                continue;
            };
            let shown = ctrl
                .value_label()
                .unwrap_or_else(|| format!("{}", ctrl.value()));
            println!("  {:<16} {:<24} {}", ctrl.name(), ctrl.address(), shown);
        }
    }
}
