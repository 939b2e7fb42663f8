use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use line_sort::{ExternalSorterBuilder, LogObserver};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let chunk_size: ByteSize = arg_parser.value_of_t_or_exit("chunk_size");
    let rw_buf_size: Option<ByteSize> = arg_parser
        .is_present("rw_buf_size")
        .then(|| arg_parser.value_of_t_or_exit("rw_buf_size"));
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let keep_temp = arg_parser.is_present("keep_temp");
    let merge_only = arg_parser.is_present("merge_only");

    let mut sorter_builder = ExternalSorterBuilder::new()
        .with_chunk_size(chunk_size.as_u64())
        .with_keep_runs(keep_temp)
        .with_observer(LogObserver);

    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    if let Some(rw_buf_size) = rw_buf_size {
        sorter_builder = sorter_builder.with_rw_buf_size(rw_buf_size.as_u64() as usize);
    }

    let sorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    let output = match arg_parser.value_of("output") {
        Some(output) => path::Path::new(output),
        None => {
            log::error!("output file is not specified");
            process::exit(1);
        }
    };

    let result = match (merge_only, arg_parser.value_of("input")) {
        (true, _) => sorter.merge_dir(output),
        (false, Some(input)) => sorter.sort_file(path::Path::new(input), output),
        (false, None) => {
            log::error!("input file is not specified");
            process::exit(1);
        }
    };

    match result {
        Ok(report) => {
            if let Some(err) = report.cleanup_error {
                log::warn!("temporary data cleanup error: {}", err);
            }
        }
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
        }
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn validate_size(value: &str) -> Result<(), String> {
    match value.parse::<ByteSize>() {
        Ok(size) if size.as_u64() == 0 => Err("size must be positive".to_string()),
        Ok(_) => Ok(()),
        Err(err) => Err(format!("size format incorrect: {}", err)),
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("line-sort")
        .about("external sorter for text files")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted")
                .required_unless_present("merge_only")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file, overwritten if exists")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data, created if absent")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("chunk_size")
                .short('c')
                .long("chunk-size")
                .help("size of sorted data chunk kept in memory")
                .takes_value(true)
                .default_value("500MiB")
                .validator(validate_size),
        )
        .arg(
            clap::Arg::new("rw_buf_size")
                .short('b')
                .long("rw-buf-size")
                .help("temporary files read/write buffer size")
                .takes_value(true)
                .validator(validate_size),
        )
        .arg(
            clap::Arg::new("keep_temp")
                .short('k')
                .long("keep-temp")
                .help("leave temporary files on disk after sorting"),
        )
        .arg(
            clap::Arg::new("merge_only")
                .short('m')
                .long("merge-only")
                .help("merge runs left in the temporary directory instead of sorting the input")
                .requires("tmp_dir"),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
