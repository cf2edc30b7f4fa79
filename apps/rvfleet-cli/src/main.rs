use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use rvfleet_common::{MachineConfig, PixelFormat};
use rvfleet_harness::{Executor, Harness, ParallelExecutor, RunReport, SerialExecutor};
use rvfleet_isa::decode;
use rvfleet_loader::Image;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rvfleet", about = "Run many RV32IM guest instances from one program image")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Rgb8,
    F32le,
    LegacyBeU32,
}

impl From<FormatArg> for PixelFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Rgb8 => PixelFormat::Rgb8,
            FormatArg::F32le => PixelFormat::F32Le,
            FormatArg::LegacyBeU32 => PixelFormat::LegacyBeU32,
        }
    }
}

#[derive(clap::Args)]
struct RunArgs {
    /// Machine config (JSON). Defaults apply to missing fields.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Number of instances
    #[arg(short = 'n', long)]
    instances: Option<usize>,
    /// Instances per scheduling group
    #[arg(long)]
    group_size: Option<usize>,
    /// Instruction budget per instance
    #[arg(long)]
    max_steps: Option<u64>,
    /// Give up waiting after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Framebuffer pixel format
    #[arg(long, value_enum)]
    format: Option<FormatArg>,
    /// Run instances one by one on the main thread
    #[arg(long)]
    serial: bool,
    /// Worker threads for the parallel executor
    #[arg(long)]
    threads: Option<usize>,
    /// Directory for framebuffer images
    #[arg(short, long, default_value = ".")]
    out: PathBuf,
}

impl RunArgs {
    fn machine_config(&self, base: MachineConfig) -> anyhow::Result<MachineConfig> {
        let mut config = match &self.config {
            Some(path) => MachineConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => base,
        };
        if let Some(n) = self.instances {
            config.harness.instance_count = n;
        }
        if let Some(g) = self.group_size {
            config.harness.group_size = g;
        }
        if let Some(steps) = self.max_steps {
            config.harness.max_steps = steps;
        }
        if let Some(ms) = self.timeout_ms {
            config.harness.wait_timeout_ms = Some(ms);
        }
        if let Some(format) = self.format {
            config.framebuffer.format = format.into();
        }
        Ok(config)
    }

    fn executor(&self) -> Box<dyn Executor> {
        if self.serial {
            Box::new(SerialExecutor)
        } else {
            Box::new(ParallelExecutor {
                threads: self.threads,
            })
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Print the default machine config as JSON
    Config,
    /// Show an image's header and segment table
    Inspect {
        image: PathBuf,
    },
    /// Disassemble instructions starting at the entry point
    Disasm {
        image: PathBuf,
        /// Number of instructions
        #[arg(short, long, default_value = "32")]
        count: usize,
    },
    /// Run an image on every instance and write framebuffers
    Run {
        image: PathBuf,
        #[command(flatten)]
        args: RunArgs,
    },
    /// Build the gradient guest and run it
    Demo {
        #[command(flatten)]
        args: RunArgs,
    },
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn print_report(report: &RunReport, written: &[PathBuf]) {
    println!("canonical digest: {}", hex(&report.canonical_digest));
    for instance in &report.instances {
        let framebuffer = match &instance.image {
            None => "none".to_string(),
            Some(Ok(image)) => format!("{}x{}", image.width, image.height),
            Some(Err(err)) => format!("error: {err}"),
        };
        println!(
            "[{:>4}] {:?} pc={:#010x} retired={} framebuffer={}",
            instance.index, instance.outcome, instance.pc, instance.retired, framebuffer
        );
    }
    if let Some(first) = report.instances.iter().find(|i| !i.console.is_empty()) {
        println!(
            "console [{}]: {}",
            first.index,
            String::from_utf8_lossy(&first.console).trim_end()
        );
    }
    println!(
        "clean: {}/{}, images written: {}",
        report.clean_count(),
        report.instances.len(),
        written.len()
    );
}

/// Config for the gradient guest. The guest writes Rgb8 pixels, so any
/// other `--format` is overridden.
fn demo_config(args: &RunArgs) -> anyhow::Result<MachineConfig> {
    let defaults = MachineConfig::default();
    let base = rvfleet_harness::demo::test_config(
        defaults.harness.instance_count,
        defaults.framebuffer.width,
        defaults.framebuffer.height,
    );
    let mut config = args.machine_config(base)?;
    if config.framebuffer.format != PixelFormat::Rgb8 {
        tracing::warn!(
            requested = ?config.framebuffer.format,
            "demo guest writes rgb8 pixels, ignoring requested format"
        );
        config.framebuffer.format = PixelFormat::Rgb8;
    }
    Ok(config)
}

/// Up to `count` lines of `address: word  mnemonic`, from the entry point
/// until the first address no segment covers.
fn disassemble(image: &Image, count: usize) -> Vec<String> {
    let mut lines = Vec::with_capacity(count);
    let mut next = Some(image.entry());
    while lines.len() < count {
        let Some(address) = next else {
            break;
        };
        let Some(bytes) = image.read_memory(address, 4) else {
            break;
        };
        let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        lines.push(format!("{address:#010x}:  {word:08x}  {}", decode(word)));
        next = address.checked_add(4);
    }
    lines
}

fn run(image: &Path, args: &RunArgs, config: MachineConfig) -> anyhow::Result<()> {
    let prefix = config.framebuffer.file_prefix.clone();
    let harness = Harness::with_executor(config, args.executor())?;
    let report = harness
        .run(image)
        .with_context(|| format!("running {}", image.display()))?;
    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("creating {}", args.out.display()))?;
    let written = report.write_images(&args.out, &prefix)?;
    print_report(&report, &written);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Info => {
            println!("rvfleet v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", rvfleet_common::crate_info());
            println!("isa: {}", rvfleet_isa::crate_info());
            println!("memory: {}", rvfleet_memory::crate_info());
            println!("loader: {}", rvfleet_loader::crate_info());
            println!("kernel: {}", rvfleet_kernel::crate_info());
            println!("harness: {}", rvfleet_harness::crate_info());
        }
        Commands::Config => {
            println!("{}", MachineConfig::default().to_json_pretty()?);
        }
        Commands::Inspect { image } => {
            let loaded = Image::load(&image)?;
            print!("{}", loaded.report());
        }
        Commands::Disasm { image, count } => {
            let loaded = Image::load(&image)?;
            for line in disassemble(&loaded, count) {
                println!("{line}");
            }
        }
        Commands::Run { image, args } => {
            let config = args.machine_config(MachineConfig::default())?;
            run(&image, &args, config)?;
        }
        Commands::Demo { args } => {
            let config = demo_config(&args)?;
            std::fs::create_dir_all(&args.out)
                .with_context(|| format!("creating {}", args.out.display()))?;
            let path = args.out.join("gradient.elf");
            rvfleet_harness::demo::gradient_image(&config)
                .write_to(&path)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("demo guest written to {}", path.display());
            run(&path, &args, config)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvfleet_isa::{InstructionTag, asm};
    use rvfleet_loader::{Class, ImageBuilder, LoadOptions};

    fn demo_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(["rvfleet", "demo"].iter().chain(argv)).unwrap();
        match cli.command {
            Commands::Demo { args } => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn demo_keeps_rgb8_whatever_format_is_asked_for() {
        for format in ["f32le", "legacy-be-u32", "rgb8"] {
            let config = demo_config(&demo_args(&["--format", format, "-n", "2"])).unwrap();
            assert_eq!(config.framebuffer.format, PixelFormat::Rgb8, "{format}");
            assert_eq!(config.harness.instance_count, 2);
        }
    }

    #[test]
    fn run_still_honours_format() {
        let args = demo_args(&["--format", "f32le"]);
        let config = args.machine_config(MachineConfig::default()).unwrap();
        assert_eq!(config.framebuffer.format, PixelFormat::F32Le);
    }

    #[test]
    fn disassembly_stops_at_end_of_code() {
        let bytes = ImageBuilder::new(0x0400_0000)
            .code(0x0400_0000, &[asm::addi(1, 0, 10), asm::ebreak()])
            .build();
        let image = Image::parse(bytes, &LoadOptions::default()).unwrap();
        let lines = disassemble(&image, 32);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "0x04000000:  00a00093  addi ra, zero, 10");
        assert!(lines[1].ends_with("ebreak"));
        assert_eq!(disassemble(&image, 1).len(), 1);
    }

    #[test]
    fn disassembly_near_top_of_address_space_does_not_wrap() {
        let entry = 0xFFFF_FFFF_FFFF_FFF0;
        let words = [asm::fence(), asm::rtype(InstructionTag::Add, 1, 2, 3), asm::ecall()];
        let data: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let bytes = ImageBuilder::new(entry)
            .class(Class::Elf64)
            .segment(entry, data, 15, rvfleet_loader::SegmentFlags(5))
            .build();
        let image = Image::parse(bytes, &LoadOptions::default()).unwrap();
        let lines = disassemble(&image, 32);
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("0xfffffffffffffff8:"));
    }
}
