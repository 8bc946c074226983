extern crate clap;
extern crate yapb;
extern crate termion;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;
extern crate env_logger;
extern crate flate2;
extern crate tempfile;
extern crate walkdir;

use std::{cmp, fmt, io};
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{App, Arg, ArgGroup};
use yapb::Spinner;
use yapb::Progress as BarProgress;
use failure::{Fail, Error, ResultExt};

mod error;
mod header;
mod meta;
mod read;
mod seek;
mod write;

use error::{ErrorKind, Result};

pub struct PrettyErr<'a>(&'a dyn Fail);
impl<'a> fmt::Display for PrettyErr<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)?;
        let mut x: &dyn Fail = self.0;
        while let Some(cause) = x.cause() {
            f.write_str(": ")?;
            fmt::Display::fmt(&cause, f)?;
            x = cause;
        }
        Ok(())
    }
}

pub trait ErrorExt {
    fn pretty(&self) -> PrettyErr;
}

impl ErrorExt for Error {
    fn pretty(&self) -> PrettyErr { PrettyErr(self.as_fail()) }
}

fn app() -> App<'static, 'static> {
    App::new("vtar")
        .version("0.1")
        .about("Extracts and creates vtar archives")
        .arg(Arg::with_name("VTARFILE")
             .help(".vtar file")
             .required(true))
        .arg(Arg::with_name("directory")
             .long("directory")
             .short("C")
             .value_name("DIR")
             .takes_value(true)
             .help("Change to directory DIR"))
        .arg(Arg::with_name("extract")
             .long("extract")
             .short("x")
             .help("Extract contents of VTARFILE"))
        .arg(Arg::with_name("create")
             .long("create")
             .short("c")
             .help("Create a new VTARFILE from DIR"))
        .arg(Arg::with_name("list")
             .long("list")
             .short("t")
             .help("List the records of VTARFILE"))
        .group(ArgGroup::with_name("action")
               .args(&["extract", "create", "list"])
               .required(true))
        .arg(Arg::with_name("gzip")
             .long("gzip")
             .short("z")
             .requires("create")
             .help("Compress the created archive"))
        .arg(Arg::with_name("verbose")
             .long("verbose")
             .short("v")
             .help("Log every record"))
}

fn main() {
    let args = app().get_matches();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if args.is_present("verbose") {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    if let Err(e) = run(&args) {
        eprintln!("FATAL: {}", e.pretty());
        ::std::process::exit(1);
    }
}

fn run<'a>(args: &clap::ArgMatches<'a>) -> Result<()> {
    let archive = args.value_of_os("VTARFILE").map(PathBuf::from)
        .ok_or_else(|| format_err!("missing VTARFILE"))?;
    let directory = args.value_of_os("directory").map(PathBuf::from);

    let tty = termion::is_tty(&io::stdout());
    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    let start_time = Instant::now();

    if args.is_present("create") {
        let source = directory.ok_or(ErrorKind::MissingArgument)?;
        let options = write::Options { gzip: args.is_present("gzip"), ..write::Options::default() };
        let mut status = Status::new(&mut stdout, tty);
        let summary = write::create(&source, &archive, &options, &mut |x| status.update(x))?;
        status.finish(format_args!("archived {} files and {} directories, {}B in {}s",
                                   summary.files, summary.directories,
                                   yapb::prefix::Binary(summary.bytes as f64),
                                   seconds(start_time)));
    } else if args.is_present("extract") {
        let dest = directory.unwrap_or_else(|| PathBuf::from("."));
        let mut reader = read::Archive::open(&archive)?;
        let mut status = Status::new(&mut stdout, tty);
        let summary = reader.extract(&dest, &mut |x| status.update(x))
            .with_context(|_| format!("failed to extract {}", archive.display()))?;
        status.finish(format_args!("extracted {} files and {} directories, {}B in {}s",
                                   summary.files, summary.directories,
                                   yapb::prefix::Binary(summary.bytes as f64),
                                   seconds(start_time)));
    } else {
        let mut reader = read::Archive::open(&archive)?;
        writeln!(stdout, "{}", read::LISTING_HEADER)?;
        while let Some((pos, record)) = reader.next_record()? {
            writeln!(stdout, "{}", read::Row(pos, &record))?;
        }
    }
    Ok(())
}

fn seconds(start: Instant) -> yapb::prefix::Scientific {
    let time = Instant::now() - start;
    yapb::prefix::Scientific(time.as_secs() as f64 + time.subsec_nanos() as f64 * 1e-9)
}

/// Redraws a single progress line on a terminal; silent otherwise.
struct Status<W: Write> {
    out: W,
    tty: bool,
    bar: yapb::Bar,
    spinner: yapb::Snake,
    last_draw: Option<Instant>,
}

impl<W: Write> Status<W> {
    fn new(out: W, tty: bool) -> Self {
        Self { out, tty, bar: yapb::Bar::new(), spinner: yapb::Snake::new(), last_draw: None }
    }

    fn update(&mut self, progress: &meta::Progress) {
        if !self.tty || self.last_draw.map_or(false, |x| x.elapsed() < Duration::from_millis(100)) {
            return;
        }
        self.last_draw = Some(Instant::now());
        self.spinner.step(1);
        // output errors are not worth aborting the archive over
        let _ = if progress.total_bytes == 0 {
            write!(self.out, "{}{}{} {} entries, {}B",
                   termion::cursor::Left(!0), termion::clear::CurrentLine, self.spinner,
                   progress.entries, yapb::prefix::Binary(progress.bytes as f64))
        } else {
            let width = termion::terminal_size().map(|(x, _)| x as usize).unwrap_or(80);
            self.bar.set(cmp::min(progress.total_bytes, progress.bytes) as f32 / progress.total_bytes as f32);
            write!(self.out, "{}{} {:3}% [{:width$}]{}",
                   termion::cursor::Left(!0), self.spinner, (self.bar.get() * 100.0) as u32, self.bar,
                   termion::clear::UntilNewline,
                   width = width.saturating_sub(10))
        };
        let _ = self.out.flush();
    }

    fn finish(&mut self, message: fmt::Arguments) {
        if self.tty {
            let _ = write!(self.out, "{}{}", termion::cursor::Left(!0), termion::clear::CurrentLine);
        }
        let _ = writeln!(self.out, "{}", message);
    }
}
