//! Command-line surface

use std::collections::HashSet;
use std::path::PathBuf;

use clap::Parser;
use varwatch_dwarf::{ScopeFilter, WatchFilter};

#[derive(Parser, Debug)]
#[command(name = "varwatch")]
#[command(
    about = "Watches every variable of one function in a native executable \
             and reports each change, line by line"
)]
#[command(version)]
pub struct Args {
    /// Executable to debug (unstripped, built with -O0 -gdwarf-2 -no-pie
    /// -fno-omit-frame-pointer)
    pub executable: String,

    /// Function whose variables are watched
    pub function: String,

    /// Arguments passed through to the executable
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub exe_args: Vec<String>,

    /// Quote the debugged source line in each notification
    #[arg(long, short = 's')]
    pub show_lines: bool,

    /// Context lines around the quoted source line (with --show-lines)
    #[arg(long, short = 'c', value_name = "N", default_value_t = 0)]
    pub context: u32,

    /// Watch only stack variables of the function
    #[arg(long, short = 'l')]
    pub only_locals: bool,

    /// Watch only static-storage variables
    #[arg(long, short = 'g')]
    pub only_globals: bool,

    /// Never report these variables
    #[arg(
        long,
        short = 'i',
        value_name = "v1,v2,...",
        conflicts_with = "watch_list"
    )]
    pub ignore_list: Option<String>,

    /// Report only these variables
    #[arg(long, short = 'w', value_name = "v1,v2,...")]
    pub watch_list: Option<String>,

    /// Redirect the report stream to a file
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Print the gathered debug information and the breakpoint list, then
    /// exit
    #[arg(long, short = 'd')]
    pub dump_all: bool,

    /// Restrict breakpoints to assignment-bearing lines found by parsing
    /// the source
    #[arg(long, short = 'S')]
    pub static_analysis: bool,

    /// Language standard handed to the source parser (e.g. gnu11, c99)
    #[arg(long = "std", value_name = "STD", requires = "static_analysis")]
    pub standard: Option<String>,

    /// Include directory for the source parser
    #[arg(short = 'I', value_name = "DIR", requires = "static_analysis")]
    pub include: Vec<PathBuf>,

    /// Macro definition for the source parser (NAME or NAME=VALUE)
    #[arg(short = 'D', value_name = "NAME[=VALUE]", requires = "static_analysis")]
    pub define: Vec<String>,

    /// Macro undefinition for the source parser
    #[arg(short = 'U', value_name = "NAME", requires = "static_analysis")]
    pub undefine: Vec<String>,

    /// Keep a single breakpoint per source line (unsafe: repeated lines may
    /// report a wrong line number)
    #[arg(long)]
    pub avoid_equal_statements: bool,
}

impl Args {
    /// Which storage classes to watch; naming neither flag means both
    pub fn scope_filter(&self) -> ScopeFilter {
        ScopeFilter {
            globals: self.only_globals || !self.only_locals,
            locals: self.only_locals || !self.only_globals,
        }
    }

    /// Name filter built from the watch- or ignore-list
    pub fn watch_filter(&self) -> WatchFilter {
        if let Some(list) = &self.watch_list {
            WatchFilter::Watch(parse_name_list(list))
        } else if let Some(list) = &self.ignore_list {
            WatchFilter::Ignore(parse_name_list(list))
        } else {
            WatchFilter::All
        }
    }

    /// argv handed to execv: the target's own name first
    pub fn target_argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.exe_args.len() + 1);
        argv.push(self.executable.clone());
        argv.extend(self.exe_args.iter().cloned());
        argv
    }
}

/// Split a comma-separated variable list, dropping stray blanks
fn parse_name_list(list: &str) -> HashSet<String> {
    list.split(',')
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}
