use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use famistep::config::{DecodePolicy, EmulatorConfig, init_logging};
use famistep::nes::{Button, ControllerPort, CpuRegisters, Nes};
use serde::Serialize;
use sha1::{Digest, Sha1};

#[derive(Debug, Clone)]
struct Config {
    rom: Option<PathBuf>,
    frames: u32,
    config_path: Option<PathBuf>,
    policy: Option<DecodePolicy>,
    held_buttons: Vec<Button>,
    json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rom: None,
            frames: 60,
            config_path: None,
            policy: None,
            held_buttons: Vec::new(),
            json: false,
        }
    }
}

#[derive(Debug, Serialize)]
struct RunReport {
    rom: String,
    frames: u32,
    cpu_cycles: u64,
    registers: CpuRegisters,
    nmi_count: u64,
    unknown_opcodes: u64,
    ppu_scanline: u16,
    ppu_dot: u16,
    frame_sha1: String,
    elapsed_ms: u128,
}

fn parse_args() -> Result<Config> {
    let mut cfg = Config::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--rom" => {
                let value = args
                    .next()
                    .context("--rom requires a path, e.g. --rom roms/nestest.nes")?;
                cfg.rom = Some(PathBuf::from(value));
            }
            "--frames" => {
                let value = args
                    .next()
                    .context("--frames requires an integer, e.g. --frames 60")?;
                cfg.frames = value
                    .parse::<u32>()
                    .with_context(|| format!("invalid --frames value: {value}"))?;
            }
            "--config" => {
                let value = args
                    .next()
                    .context("--config requires a path to a JSON config file")?;
                cfg.config_path = Some(PathBuf::from(value));
            }
            "--policy" => {
                let value = args
                    .next()
                    .context("--policy requires a value, e.g. --policy halt")?;
                let policy = DecodePolicy::from_name(&value)
                    .with_context(|| format!("invalid --policy value: {value}"))?;
                cfg.policy = Some(policy);
            }
            "--press" => {
                let value = args
                    .next()
                    .context("--press requires button names, e.g. --press start,a")?;
                for name in value.split(',').filter(|name| !name.is_empty()) {
                    let button = Button::from_name(name)
                        .with_context(|| format!("unknown button in --press: {name}"))?;
                    cfg.held_buttons.push(button);
                }
            }
            "--json" => cfg.json = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other if cfg.rom.is_none() && !other.starts_with('-') => {
                cfg.rom = Some(PathBuf::from(other));
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    Ok(cfg)
}

fn print_help() {
    println!(
        "famistep\n\n\
Usage:\n\
  famistep [options] --rom <path>\n\n\
Options:\n\
  --rom <path>          iNES image to run (may also be given positionally)\n\
  --frames <n>          Frames to emulate (default 60)\n\
  --config <path>       JSON emulator config\n\
  --policy <skip|halt>  Undefined opcode handling, overrides the config\n\
  --press <buttons>     Comma separated buttons held on controller one\n\
  --json                Print the run report as JSON\n\
  -h, --help            Show this help\n"
    );
}

fn hash_frame(frame: &[u32]) -> String {
    let mut rgba = Vec::with_capacity(frame.len() * 4);
    for pixel in frame {
        let [a, r, g, b] = pixel.to_be_bytes();
        rgba.extend_from_slice(&[r, g, b, a]);
    }
    BASE64_STANDARD.encode(Sha1::digest(&rgba))
}

fn main() -> Result<()> {
    let cfg = parse_args()?;

    let mut emulator_config = match &cfg.config_path {
        Some(path) => EmulatorConfig::from_file(path)?,
        None => EmulatorConfig::default(),
    };
    if let Some(policy) = cfg.policy {
        emulator_config.decode_policy = policy;
    }
    init_logging(&emulator_config)?;

    let rom = cfg
        .rom
        .clone()
        .context("no ROM given; pass --rom <path> (see --help)")?;

    let mut nes = Nes::with_config(emulator_config);
    nes.load_rom_from_path(&rom)
        .with_context(|| format!("failed to load ROM {}", rom.display()))?;
    for button in &cfg.held_buttons {
        nes.set_button_state(ControllerPort::One, *button, true);
    }

    let start = Instant::now();
    let mut cpu_cycles = 0u64;
    for frame in 0..cfg.frames {
        cpu_cycles += nes
            .run_frame()
            .with_context(|| format!("emulation stopped during frame {frame}"))?;
    }

    let (ppu_scanline, ppu_dot) = nes.ppu_position();
    let report = RunReport {
        rom: rom.display().to_string(),
        frames: cfg.frames,
        cpu_cycles,
        registers: nes.registers(),
        nmi_count: nes.nmi_count(),
        unknown_opcodes: nes.unknown_opcode_count(),
        ppu_scanline,
        ppu_dot,
        frame_sha1: hash_frame(nes.frame_buffer()),
        elapsed_ms: start.elapsed().as_millis(),
    };

    if cfg.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let regs = report.registers;
    println!("ROM: {}", report.rom);
    println!(
        "Frames: {} | CPU cycles: {} | NMIs: {} | Undefined opcodes: {}",
        report.frames, report.cpu_cycles, report.nmi_count, report.unknown_opcodes
    );
    println!(
        "CPU: PC=${:04X} A=${:02X} X=${:02X} Y=${:02X} P=${:02X} SP=${:02X}",
        regs.pc, regs.a, regs.x, regs.y, regs.p, regs.sp
    );
    println!("PPU: scanline={} dot={}", report.ppu_scanline, report.ppu_dot);
    println!("Frame SHA-1 (base64): {}", report.frame_sha1);
    println!("Elapsed: {} ms", report.elapsed_ms);

    Ok(())
}
