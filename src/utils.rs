use ansi_term::Colour::{Green, Red};

/// Get 64-bit unsigned integer value in little endian order.
pub fn get_u64(binary: &[u8]) -> u64 {
    let mut res = 0;
    for (i, byte) in binary.iter().enumerate().take(8) {
        res += (*byte as u64) << (i * 8);
    }
    res
}

/// Write 64-bit unsigned integer value to binary in little endian order.
pub fn put_u64(binary: &mut [u8], val: u64) {
    for (i, byte) in binary.iter_mut().enumerate().take(8) {
        *byte = (val >> (i * 8)) as u8;
    }
}

/// Write a 32-bit instruction word to binary in little endian order.
pub fn put_u32(binary: &mut [u8], val: u32) {
    for (i, byte) in binary.iter_mut().enumerate().take(4) {
        *byte = (val >> (i * 8)) as u8;
    }
}

/// Get a 32-bit instruction word in little endian order.
pub fn get_u32(binary: &[u8]) -> u32 {
    let mut res = 0;
    for (i, byte) in binary.iter().enumerate().take(4) {
        res += (*byte as u32) << (i * 8);
    }
    res
}

/// logging configuration for the CLI binaries
pub fn logging_setup(max_level: tracing::Level) {
    use tracing_subscriber::{filter, prelude::*};

    let filter = filter::filter_fn(move |meta| *meta.level() <= max_level);

    let terminal_log = tracing_subscriber::fmt::layer()
        .compact()
        .with_file(false)
        .with_target(false)
        .without_time()
        .with_thread_names(false)
        .with_filter(filter);

    tracing_subscriber::registry().with(terminal_log).init();
}

pub fn format_ctrl(mode: crate::pipeline::CtlMode) -> String {
    use crate::pipeline::CtlMode;
    match mode {
        CtlMode::Bubble => Red.bold().paint("Bubble").to_string(),
        CtlMode::Stall => Red.bold().paint("Stall ").to_string(),
        CtlMode::Load => Green.paint("Normal").to_string(),
        CtlMode::Error => Red.bold().paint("Error ").to_string(),
    }
}

pub fn format_reg_val(val: u64) -> String {
    format!("{val:#018x}")
}

/// Print the 8-byte words that differ between two data images.
pub fn mem_diff(left: &[u8], right: &[u8], base: u64) {
    for i in 0..left.len().min(right.len()) >> 3 {
        let offset = i << 3;
        if get_u64(&left[offset..]) != get_u64(&right[offset..]) {
            print!("{:#010x}: ", base + offset as u64);
            for b in &left[offset..offset + 8] {
                print!("{:02x}", b);
            }
            print!(" -> ");
            for b in &right[offset..offset + 8] {
                print!("{:02x}", b);
            }
            println!();
        }
    }
}
