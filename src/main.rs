use anyhow::{Context, Result};
use clap::Parser;
use fusetrace::cli::{Cli, Format};
use fusetrace::{format, proto, FrameReader};
use std::io::{BufReader, Read, Write};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only use colors when outputting to a TTY (not when piped to a file)
    let use_color = atty::is(atty::Stream::Stderr);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(use_color)
        .init();

    let (schema, layouts) = proto::tables().context("building protocol tables")?;

    if cli.show_ops {
        println!(
            "built-in protocol tables (FUSE {}.{})",
            proto::FUSE_MAJOR,
            proto::FUSE_MINOR
        );
        for (opcode, name) in schema.opcode_names() {
            println!("{opcode:4}  {name}");
        }
        return Ok(());
    }

    let input: Box<dyn Read> = match cli.input.as_deref() {
        None => Box::new(std::io::stdin().lock()),
        Some(p) if p.as_os_str() == "-" => Box::new(std::io::stdin().lock()),
        Some(path) => Box::new(
            std::fs::File::open(path)
                .with_context(|| format!("opening {}", path.display()))?,
        ),
    };

    let reader = FrameReader::new(BufReader::new(input), &schema, &layouts)
        .context("setting up frame reader")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for frame in reader {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                // frames already printed stay valid; the stream does not
                error!("stream decoding stopped: {e}");
                std::process::exit(1);
            }
        };
        match cli.format {
            Format::Fmt => writeln!(out, "{}", format::format_frame(&frame, cli.limit))?,
            Format::Json => {
                writeln!(out, "{}", format::frame_to_json(&frame, cli.limit))?
            }
            Format::Null => {}
        }
    }

    Ok(())
}
