#[macro_use]
extern crate clap;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Arg, ArgGroup};

use asmx_core::{Assembler, CpuRegistry, Error, ListingOptions, ListingWriter, ObjectWriter, Severity, SRecordWidth};

fn main() {
    let matches = app_from_crate!()
        .arg(Arg::with_name("SRCFILE").help("Source file to assemble").required(true).index(1))
        .arg(Arg::with_name("errors").short("e").help("Echo errors to stderr"))
        .arg(Arg::with_name("warnings").short("w").help("Echo warnings to stderr"))
        .arg(Arg::with_name("list_pass1").short("1").help("Include pass 1 in the listing"))
        .arg(
            Arg::with_name("listing")
                .short("l")
                .takes_value(true)
                .min_values(0)
                .value_name("FILE")
                .help("Write a listing file (default: <src>.lst)"),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .takes_value(true)
                .min_values(0)
                .value_name("FILE")
                .help("Write the object file here (default by format)"),
        )
        .arg(
            Arg::with_name("predefine")
                .short("d")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .value_name("NAME[:]=VALUE")
                .help("Predefine a symbol (`:=` for SET, `=` for EQU)"),
        )
        .arg(Arg::with_name("s9").long("s9").help("S-record, 16-bit addresses"))
        .arg(Arg::with_name("s19").long("s19").help("S-record, 16-bit addresses"))
        .arg(Arg::with_name("s28").long("s28").help("S-record, 24-bit addresses"))
        .arg(Arg::with_name("s37").long("s37").help("S-record, 32-bit addresses"))
        .arg(
            Arg::with_name("raw")
                .short("b")
                .takes_value(true)
                .min_values(0)
                .value_name("BASE[-END]")
                .help("Raw binary, optional address window"),
        )
        .arg(
            Arg::with_name("trsdos")
                .short("t")
                .takes_value(true)
                .min_values(0)
                .value_name("RECLEN")
                .help("TRSDOS .cmd (implies default CPU Z80)"),
        )
        .arg(
            Arg::with_name("cassette")
                .short("T")
                .takes_value(true)
                .min_values(0)
                .value_name("RECLEN")
                .help("TRS-80 cassette (implies default CPU Z80)"),
        )
        .arg(Arg::with_name("stdout").short("c").help("Write the object file to stdout"))
        .arg(Arg::with_name("cpu").short("C").takes_value(true).value_name("CPU").help("Default CPU type"))
        .group(ArgGroup::with_name("format").args(&["s9", "s19", "s28", "s37", "raw", "trsdos", "cassette"]))
        .get_matches();

    if matches.is_present("stdout") && (matches.is_present("output") || matches.is_present("raw")) {
        eprintln!("{}", Error::ConflictingOutputOptions);
        process::exit(1);
    }

    match run(&matches) {
        Ok(had_errors) => process::exit(had_errors as i32),
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn run(matches: &clap::ArgMatches) -> Result<bool, Box<dyn std::error::Error>> {
    let src = matches.value_of("SRCFILE").unwrap();
    let src_path = Path::new(src);

    let mut registry = CpuRegistry::new();
    registry.register(Box::new(cpu_6502::Mos6502));
    registry.register(Box::new(cpu_z80::Zilog80));
    let mut asm = Assembler::new(registry);

    let default_cpu = matches
        .value_of("cpu")
        .map(str::to_string)
        .unwrap_or_else(|| if matches.is_present("trsdos") || matches.is_present("cassette") { "Z80".to_string() } else { "6502".to_string() });
    asm.set_default_cpu(&default_cpu)?;

    if let Some(defs) = matches.values_of("predefine") {
        for def in defs {
            let (name, value, is_set) = parse_predefine(def)?;
            asm.predefine(&name, value, is_set);
        }
    }

    if matches.is_present("listing") || matches.is_present("list_pass1") {
        let path = match matches.value_of("listing") {
            Some(p) => PathBuf::from(p),
            None => src_path.with_extension("lst"),
        };
        let file = File::create(&path)?;
        let mut options = ListingOptions::default();
        options.list_pass1 = matches.is_present("list_pass1");
        asm.listing = Some(ListingWriter::new(Box::new(file), options));
    }

    let format = ObjectFormat::from_matches(matches);
    let default_name = src_path.with_extension(format.default_extension());
    let src_name = src_path.file_stem().and_then(|s| s.to_str()).unwrap_or("");

    if matches.is_present("stdout") {
        asm.object = Some(format.build(Box::new(io::stdout()), src_name));
    } else if format.is_raw() {
        // Raw binary buffers in memory; flushed to disk after assembly.
        asm.object = Some(format.build(Box::new(io::sink()), src_name));
    } else {
        let path = match matches.value_of("output") {
            Some(p) => PathBuf::from(p),
            None => default_name.clone(),
        };
        let file = File::create(&path)?;
        asm.object = Some(format.build(Box::new(file), src_name));
    }

    let report = asm.run(src)?;

    if matches.is_present("errors") || matches.is_present("warnings") {
        for diag in &report.diagnostics {
            let show = match diag.severity {
                Severity::Error => matches.is_present("errors"),
                Severity::Warning => matches.is_present("warnings"),
            };
            if show {
                eprintln!("{}", diag);
            }
        }
    }

    if format.is_raw() {
        if let Some(bytes) = asm.object.as_ref().and_then(ObjectWriter::raw_bytes) {
            if matches.is_present("stdout") {
                io::stdout().write_all(bytes)?;
            } else {
                let path = matches.value_of("output").map(PathBuf::from).unwrap_or(default_name);
                File::create(&path)?.write_all(bytes)?;
            }
        }
    }

    Ok(report.error_count > 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectFormat {
    IntelHex,
    SRecord(SRecordWidth),
    Raw(Option<u32>, Option<u32>),
    Trsdos(usize),
    TrsCassette(usize),
}

impl ObjectFormat {
    fn from_matches(matches: &clap::ArgMatches) -> Self {
        if matches.is_present("s9") || matches.is_present("s19") {
            ObjectFormat::SRecord(SRecordWidth::Bits16)
        } else if matches.is_present("s28") {
            ObjectFormat::SRecord(SRecordWidth::Bits24)
        } else if matches.is_present("s37") {
            ObjectFormat::SRecord(SRecordWidth::Bits32)
        } else if matches.is_present("raw") {
            let (base, end) = match matches.value_of("raw") {
                Some(window) => parse_raw_window(window),
                None => (None, None),
            };
            ObjectFormat::Raw(base, end)
        } else if matches.is_present("trsdos") {
            let reclen = matches.value_of("trsdos").and_then(|s| s.parse().ok()).unwrap_or(256);
            ObjectFormat::Trsdos(reclen)
        } else if matches.is_present("cassette") {
            let reclen = matches.value_of("cassette").and_then(|s| s.parse().ok()).unwrap_or(256);
            ObjectFormat::TrsCassette(reclen)
        } else {
            ObjectFormat::IntelHex
        }
    }

    fn is_raw(self) -> bool {
        matches!(self, ObjectFormat::Raw(..))
    }

    fn default_extension(self) -> &'static str {
        match self {
            ObjectFormat::IntelHex => "hex",
            ObjectFormat::SRecord(SRecordWidth::Bits16) => "s19",
            ObjectFormat::SRecord(SRecordWidth::Bits24) => "s28",
            ObjectFormat::SRecord(SRecordWidth::Bits32) => "s37",
            ObjectFormat::Raw(..) => "bin",
            ObjectFormat::Trsdos(_) => "cmd",
            ObjectFormat::TrsCassette(_) => "cas",
        }
    }

    fn build(self, out: Box<dyn Write>, src_name: &str) -> ObjectWriter<Box<dyn Write>> {
        match self {
            ObjectFormat::IntelHex => ObjectWriter::new_intel_hex(out),
            ObjectFormat::SRecord(width) => ObjectWriter::new_srecord(out, width),
            ObjectFormat::Raw(base, end) => ObjectWriter::new_raw(base, end),
            ObjectFormat::Trsdos(reclen) => ObjectWriter::new_trsdos(out, reclen),
            ObjectFormat::TrsCassette(reclen) => ObjectWriter::new_trs_cassette(out, reclen, src_name),
        }
    }
}

/// Parses `-d NAME=VALUE` (EQU) or `-d NAME:=VALUE` (SET). `VALUE` accepts
/// a `0x`/`$` hex prefix or a plain decimal.
fn parse_predefine(def: &str) -> Result<(String, i32, bool), String> {
    let (name, rest, is_set) = if let Some(idx) = def.find(":=") {
        (&def[..idx], &def[idx + 2..], true)
    } else if let Some(idx) = def.find('=') {
        (&def[..idx], &def[idx + 1..], false)
    } else {
        return Err(format!("-d {}: expected NAME=VALUE or NAME:=VALUE", def));
    };

    let value = parse_int(rest).ok_or_else(|| format!("-d {}: invalid numeric value {:?}", def, rest))?;
    Ok((name.to_string(), value, is_set))
}

/// Parses `-b`'s `BASE[-END]` address window. An unparsed half is left as
/// `None` rather than rejected, matching `-b`'s own min-values(0) shape
/// (a bare `-b` is a window over the whole address space).
fn parse_raw_window(text: &str) -> (Option<u32>, Option<u32>) {
    match text.split_once('-') {
        Some((base, end)) => (parse_int(base).map(|v| v as u32), parse_int(end).map(|v| v as u32)),
        None => (parse_int(text).map(|v| v as u32), None),
    }
}

fn parse_int(text: &str) -> Option<i32> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i32::from_str_radix(hex, 16).ok()
    } else if let Some(hex) = text.strip_prefix('$') {
        i32::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}
