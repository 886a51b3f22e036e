use clap::{ArgGroup, Parser};
use splat_lib::{
    convert_ply, fetch_splats, prepare_rows, rows_in, CancelFlag, SortConfig, SortReply,
    SortWorker, SortedAttributes, ViewProj,
};
use std::error::Error;
use std::fs;
use std::process;
use std::time::Instant;

/// Camera used when `--view` is not given.
const DEFAULT_VIEW: &str = "0.47,0.04,0.88,0,-0.11,0.99,0.02,0,-0.88,-0.11,0.47,0,0.07,0.03,6.55,1";

#[derive(Parser, Debug)]
#[command(
    name = "Splat Converter/Sorter",
    version = "1.0",
    about = "Converts PLY splats to raw rows, depth-sorts them, or streams them from a URL"
)]
#[command(group(
    ArgGroup::new("mode").required(true).args(&["convert", "sort", "fetch"])
))]
struct Cli {
    #[arg(short = 'c', long = "convert", help = "Convert a PLY file into raw splat rows.")]
    convert: bool,

    #[arg(short = 's', long = "sort", help = "Depth-sort a .splat or PLY file once.")]
    sort: bool,

    #[arg(
        short = 'f',
        long = "fetch",
        help = "Stream raw splat rows from a URL, sorting as they arrive."
    )]
    fetch: bool,

    #[arg(
        short = 'i',
        long = "input",
        value_name = "INPUT",
        required = true,
        help = "Path to the input file, or the URL to fetch."
    )]
    input: String,

    #[arg(
        short = 'o',
        long = "output",
        value_name = "OUTPUT",
        help = "Path to the output file (required for --convert and --fetch)."
    )]
    output: Option<String>,

    #[arg(
        short = 'm',
        long = "max-splats",
        value_name = "COUNT",
        help = "Sort at most this many splats."
    )]
    max_splats: Option<usize>,

    #[arg(
        short = 'v',
        long = "view",
        value_name = "MATRIX",
        default_value = DEFAULT_VIEW,
        value_parser = parse_view,
        allow_hyphen_values = true,
        help = "Row-major view-projection matrix as 16 comma-separated floats."
    )]
    view: ViewProj,
}

fn parse_view(s: &str) -> Result<ViewProj, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f32>().map_err(|e| format!("'{}': {}", v, e)))
        .collect::<Result<Vec<f32>, String>>()?;
    values
        .try_into()
        .map_err(|v: Vec<f32>| format!("expected 16 values, got {}", v.len()))
}

fn read_input(path: &str) -> Vec<u8> {
    fs::read(path).unwrap_or_else(|e| {
        eprintln!("Error reading input file {}: {}", path, e);
        process::exit(1);
    })
}

fn write_output(path: &str, data: &[u8]) {
    fs::write(path, data).unwrap_or_else(|e| {
        eprintln!("Error writing output '{}': {}", path, e);
        process::exit(1);
    });
    println!("Successfully wrote {} splats to '{}'.", rows_in(data.len()), path);
}

fn require_output(cli: &Cli) -> &str {
    cli.output.as_deref().unwrap_or_else(|| {
        eprintln!("Error: --output (-o) is required with --convert and --fetch.");
        process::exit(1);
    })
}

fn report(sorted: &SortedAttributes) {
    let first = sorted.center.get(0..3);
    println!("Sorted {} splats, farthest center: {:?}", sorted.len(), first);
}

fn run_sort(cli: &Cli) -> Result<(), Box<dyn Error + Send + Sync>> {
    let rows = prepare_rows(&read_input(&cli.input))?;
    println!("Loaded {} splats from '{}'", rows_in(rows.len()), cli.input);

    let start = Instant::now();
    let mut worker = SortWorker::spawn(SortConfig::default())?;
    worker.replace_buffer(rows)?;
    worker.request_sort(cli.view, cli.max_splats)?;
    worker.close();

    let mut latest = None;
    while let Some(reply) = worker.recv_blocking() {
        if let SortReply::Sorted(sorted) = reply {
            latest = Some(sorted);
        }
    }
    println!("Sort Time: {} ms", start.elapsed().as_millis());

    match latest {
        Some(sorted) => {
            report(&sorted);
            if let Some(output) = &cli.output {
                write_output(output, &sorted.to_rows());
            }
        }
        None => println!("Nothing to sort."),
    }
    Ok(())
}

fn run_fetch(cli: &Cli) -> Result<(), Box<dyn Error + Send + Sync>> {
    let output = require_output(cli);
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        let cancel = CancelFlag::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted, cancelling load");
                on_interrupt.cancel();
            }
        });

        let mut worker = SortWorker::spawn(SortConfig::default())?;
        let (view, max_splats) = (cli.view, cli.max_splats);
        let start = Instant::now();

        let result = fetch_splats(&cli.input, &cancel, |update| {
            worker.publish(update)?;
            worker.request_sort(view, max_splats)
        })
        .await?;
        worker.close();

        let mut sorts = 0;
        let mut latest = None;
        while let Some(reply) = worker.recv().await {
            if let SortReply::Sorted(sorted) = reply {
                sorts += 1;
                latest = Some(sorted);
            }
        }
        println!(
            "Fetch Time: {} ms, {} progressive sorts",
            start.elapsed().as_millis(),
            sorts
        );
        if let Some(sorted) = &latest {
            report(sorted);
        }
        if result.cancelled {
            println!("Load cancelled after {} splats.", result.vertex_count);
        }

        let usable = result.vertex_count * splat_lib::ROW_LENGTH;
        write_output(output, &result.buffer[..usable]);
        Ok::<(), Box<dyn Error + Send + Sync>>(())
    })
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if cli.convert {
        let output = require_output(&cli);
        let raw_data = read_input(&cli.input);
        println!("Mode: Conversion\nInput: {} | Output: {}", cli.input, output);

        let start = Instant::now();
        let mut rows = Vec::new();
        convert_ply(&raw_data, &mut rows)?;
        println!("Conversion Time: {} ms", start.elapsed().as_millis());
        write_output(output, &rows);
        Ok(())
    } else if cli.sort {
        run_sort(&cli)
    } else {
        run_fetch(&cli)
    }
}
