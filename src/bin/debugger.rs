use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use famistep::config::{EmulatorConfig, init_logging};
use famistep::nes::instructions::{AddressingMode, lookup};
use famistep::nes::{Button, ControllerPort, Nes};

fn print_help() {
    println!("Commands:");
    println!("  step, s [n]           - Execute n instructions (default 1)");
    println!("  frame, f [n]          - Run n frames (default 1)");
    println!("  regs, r               - Show CPU registers");
    println!("  mem, m <addr> [len]   - Dump memory (hex), len defaults to 16");
    println!("  ppu                   - Show PPU state");
    println!("  press <button> [1|2]  - Hold a button (a b select start up down left right)");
    println!("  release <button> [1|2]- Release a button");
    println!("  reset                 - Reset the console");
    println!("  quit, q               - Exit debugger");
}

fn parse_hex(text: &str) -> Option<u16> {
    let digits = text
        .trim_start_matches('$')
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u16::from_str_radix(digits, 16).ok()
}

fn parse_count(text: Option<&&str>) -> Option<u32> {
    match text {
        Some(value) => value.parse().ok(),
        None => Some(1),
    }
}

fn parse_port(text: Option<&&str>) -> Option<ControllerPort> {
    match text.copied() {
        None | Some("1") => Some(ControllerPort::One),
        Some("2") => Some(ControllerPort::Two),
        Some(_) => None,
    }
}

/// One-line disassembly of the instruction at `pc`.
fn disassemble(nes: &Nes, pc: u16) -> String {
    let opcode = nes.peek_memory(pc);
    let Some(instruction) = lookup(opcode) else {
        return format!("${pc:04X}: {opcode:02X}        ???");
    };

    let lo = nes.peek_memory(pc.wrapping_add(1));
    let hi = nes.peek_memory(pc.wrapping_add(2));
    let word = u16::from_le_bytes([lo, hi]);
    let operand = match instruction.mode {
        AddressingMode::Implied => String::new(),
        AddressingMode::Accumulator => "A".to_string(),
        AddressingMode::Immediate => format!("#${lo:02X}"),
        AddressingMode::ZeroPage => format!("${lo:02X}"),
        AddressingMode::ZeroPageX => format!("${lo:02X},X"),
        AddressingMode::ZeroPageY => format!("${lo:02X},Y"),
        AddressingMode::Absolute => format!("${word:04X}"),
        AddressingMode::AbsoluteX => format!("${word:04X},X"),
        AddressingMode::AbsoluteY => format!("${word:04X},Y"),
        AddressingMode::Indirect => format!("(${word:04X})"),
        AddressingMode::IndexedIndirect => format!("(${lo:02X},X)"),
        AddressingMode::IndirectIndexed => format!("(${lo:02X}),Y"),
        AddressingMode::Relative => {
            let target = pc.wrapping_add(2).wrapping_add(lo as i8 as i16 as u16);
            format!("${target:04X}")
        }
    };

    let bytes: Vec<String> = (0..instruction.bytes as u16)
        .map(|i| format!("{:02X}", nes.peek_memory(pc.wrapping_add(i))))
        .collect();
    format!(
        "${pc:04X}: {:<9} {} {operand}",
        bytes.join(" "),
        instruction.mnemonic()
    )
}

fn print_regs(nes: &Nes) {
    let regs = nes.registers();
    let p = regs.p;
    println!("A: ${:02X}  X: ${:02X}  Y: ${:02X}", regs.a, regs.x, regs.y);
    println!("P: {:08b} (NV-BDIZC)", p);
    println!("SP: ${:02X}  PC: ${:04X}", regs.sp, regs.pc);
    println!(
        "Flags: N={} V={} D={} I={} Z={} C={}",
        (p & 0x80) != 0,
        (p & 0x40) != 0,
        (p & 0x08) != 0,
        (p & 0x04) != 0,
        (p & 0x02) != 0,
        (p & 0x01) != 0
    );
    println!("Cycles: {}", nes.total_cycles());
}

fn main() -> Result<()> {
    println!("famistep debugger");
    println!("=================");
    println!();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        println!("Usage: famistep_debug <rom.nes>");
        println!();
        print_help();
        return Ok(());
    }

    let config = EmulatorConfig {
        log_filter: "warn".to_string(),
        ..EmulatorConfig::default()
    };
    init_logging(&config)?;

    let rom_path = Path::new(&args[1]);
    println!("Loading ROM: {}", rom_path.display());

    let mut nes = Nes::with_config(config);
    nes.load_rom_from_path(rom_path)
        .with_context(|| format!("failed to load ROM {}", rom_path.display()))?;

    println!("ROM loaded ({:?} mirroring)", nes.mirroring());
    println!();
    print_regs(&nes);
    println!("{}", disassemble(&nes, nes.registers().pc));
    println!();
    println!("Type 'help' for commands");

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input)? == 0 {
            break;
        }

        let parts: Vec<&str> = input.split_whitespace().collect();
        let Some(command) = parts.first() else {
            continue;
        };

        match *command {
            "help" | "h" => print_help(),
            "step" | "s" => {
                let Some(count) = parse_count(parts.get(1)) else {
                    println!("Usage: step [n]");
                    continue;
                };
                for _ in 0..count {
                    let pc = nes.registers().pc;
                    let line = disassemble(&nes, pc);
                    match nes.step() {
                        Ok(cycles) => println!("{line}  ({cycles} cycles)"),
                        Err(err) => {
                            println!("{line}  error: {err}");
                            break;
                        }
                    }
                }
            }
            "frame" | "f" => {
                let Some(count) = parse_count(parts.get(1)) else {
                    println!("Usage: frame [n]");
                    continue;
                };
                for _ in 0..count {
                    if let Err(err) = nes.run_frame() {
                        println!("Stopped: {err}");
                        break;
                    }
                }
                println!(
                    "Frame {} | NMIs: {} | PC=${:04X}",
                    nes.frame_count(),
                    nes.nmi_count(),
                    nes.registers().pc
                );
            }
            "regs" | "r" => print_regs(&nes),
            "mem" | "m" => {
                let Some(addr) = parts.get(1).and_then(|text| parse_hex(text)) else {
                    println!("Usage: mem <addr> [len]");
                    continue;
                };
                let len = parts
                    .get(2)
                    .and_then(|text| text.parse::<u16>().ok())
                    .unwrap_or(16);
                for row in (0..len).step_by(16) {
                    let start = addr.wrapping_add(row);
                    let bytes: Vec<String> = (0..16u16.min(len - row))
                        .map(|i| format!("{:02X}", nes.peek_memory(start.wrapping_add(i))))
                        .collect();
                    println!("{start:04X}: {}", bytes.join(" "));
                }
            }
            "ppu" => {
                let (scanline, dot) = nes.ppu_position();
                let (ctrl, mask, status) = nes.ppu_registers();
                println!("PPU State:");
                println!("  Scanline: {scanline}, Dot: {dot}");
                println!("  $2000 (ctrl):   {ctrl:08b}");
                println!("  $2001 (mask):   {mask:08b}");
                println!("  $2002 (status): {status:08b}");
                println!("  Frames: {}", nes.frame_count());
            }
            "press" | "release" => {
                let pressed = *command == "press";
                let button = parts.get(1).and_then(|name| Button::from_name(name));
                let port = parse_port(parts.get(2));
                let (Some(button), Some(port)) = (button, port) else {
                    println!("Usage: {command} <button> [1|2]");
                    continue;
                };
                nes.set_button_state(port, button, pressed);
                println!(
                    "Controller {:?}: {:08b}",
                    port,
                    nes.controller_state(port)
                );
            }
            "reset" => {
                nes.reset();
                println!("{}", disassemble(&nes, nes.registers().pc));
            }
            "quit" | "q" => {
                println!("Goodbye!");
                break;
            }
            other => {
                println!("Unknown command: {other}. Type 'help' for available commands.");
            }
        }
    }

    Ok(())
}
