/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Host CLI: turns a set of ELF binaries into the boot-task list the kernel
//! expects at boot (spec §6 "Boot contract"), and renders pset/pageout/port
//! table dumps captured from a running or core-dumped kernel.

use {
    anyhow::{anyhow, Context, Result},
    clap::{Parser, Subcommand},
    colored::Colorize,
    goblin::elf::Elf,
    prettytable::{cell, row, Row, Table},
    std::{fs, path::PathBuf},
};

/// Page granule every boot task's sizes are rounded up to, matching
/// `nucleus::mm::PAGE_SIZE`.
const PAGE_SIZE: u64 = 64 * 1024;

#[derive(Parser)]
#[command(name = "vstatool", about = "Inspect and prepare VSTa kernel boot images")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the boot-task list the loader hands the kernel (spec §6).
    BootTasks {
        /// ELF binaries to include, in load order.
        #[arg(required = true)]
        elves: Vec<PathBuf>,
    },
    /// Render a pset-table dump captured from a running kernel.
    Psets {
        /// Path to a pset-table dump (one record per line: `handle,len,refs,kind`).
        dump: PathBuf,
    },
    /// Render a port-table dump captured from a running kernel.
    Ports {
        /// Path to a port-table dump (one record per line: `handle,name,queued`).
        dump: PathBuf,
    },
}

/// One entry of the boot-task list the kernel builds a proc from (spec §6:
/// "page-frame base, text vaddr/pages, data vaddr/pages, entry point").
#[derive(Debug, Clone)]
struct BootTask {
    name: String,
    frame_base: u64,
    text_vaddr: u64,
    text_pages: u64,
    data_vaddr: u64,
    data_pages: u64,
    entry: u64,
}

fn pages(byte_len: u64) -> u64 {
    byte_len.div_ceil(PAGE_SIZE)
}

/// Build one [`BootTask`] from an ELF binary: the first loadable executable
/// segment becomes "text", the first loadable writable segment becomes
/// "data". Grounded on the segment-walking pattern the teacher's own ELF
/// tool used for MMU-table patching, repurposed here for boot-task sizing
/// instead of translation-table generation.
fn boot_task_from_elf(path: &PathBuf) -> Result<BootTask> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let elf = Elf::parse(&bytes).with_context(|| format!("parsing ELF {}", path.display()))?;

    let text = elf
        .program_headers
        .iter()
        .find(|ph| ph.is_executable() && ph.p_filesz > 0)
        .ok_or_else(|| anyhow!("{}: no executable segment", path.display()))?;
    let data = elf
        .program_headers
        .iter()
        .find(|ph| ph.is_write() && !ph.is_executable())
        .unwrap_or(text);

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(BootTask {
        name,
        frame_base: text.p_paddr,
        text_vaddr: text.p_vaddr,
        text_pages: pages(text.p_memsz),
        data_vaddr: data.p_vaddr,
        data_pages: pages(data.p_memsz),
        entry: elf.entry,
    })
}

fn print_boot_tasks(tasks: &[BootTask]) {
    let mut table = Table::new();
    table.add_row(row![
        "task".bold(),
        "frame base".bold(),
        "text vaddr".bold(),
        "text pages".bold(),
        "data vaddr".bold(),
        "data pages".bold(),
        "entry".bold()
    ]);
    for t in tasks {
        table.add_row(row![
            t.name,
            format!("{:#x}", t.frame_base),
            format!("{:#x}", t.text_vaddr),
            t.text_pages,
            format!("{:#x}", t.data_vaddr),
            t.data_pages,
            format!("{:#x}", t.entry)
        ]);
    }
    table.printstd();
}

fn print_csv_dump(path: &PathBuf, header: &[&str]) -> Result<()> {
    let contents = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut table = Table::new();
    table.add_row(Row::new(header.iter().map(|h| cell!(h.bold())).collect()));
    for line in contents.lines().filter(|l| !l.trim().is_empty()) {
        table.add_row(Row::new(line.split(',').map(|c| cell!(c)).collect()));
    }
    table.printstd();
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::BootTasks { elves } => {
            let tasks: Result<Vec<_>> = elves.iter().map(boot_task_from_elf).collect();
            let tasks = tasks?;
            log::info!("built {} boot task(s)", tasks.len());
            print_boot_tasks(&tasks);
        }
        Commands::Psets { dump } => print_csv_dump(&dump, &["handle", "len", "refs", "kind"])?,
        Commands::Ports { dump } => print_csv_dump(&dump, &["handle", "name", "queued"])?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_rounds_up_to_the_granule() {
        assert_eq!(pages(0), 0);
        assert_eq!(pages(1), 1);
        assert_eq!(pages(PAGE_SIZE), 1);
        assert_eq!(pages(PAGE_SIZE + 1), 2);
    }
}
