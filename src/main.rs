use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};
use vfsi::{BackendRegistry, FileSystem, FsError, VirtualFileSystem};

#[derive(Parser, Debug)]
#[command(author, version, about = "vfsi 文件系统交互工具", long_about = None)]
struct Args {
    /// 后端名称 (ramfs / hostfs)
    #[arg(short, long, default_value = "ramfs")]
    backend: String,

    /// 传给后端 init 的配置字符串，例如 "root=/tmp/vfsi" 或 "max_files=32"
    #[arg(short, long, default_value = "")]
    config: String,

    /// 从文件读取命令，默认读取标准输入
    #[arg(short, long)]
    script: Option<PathBuf>,
}

const HELP: &str = "\
commands:
  put <name> <text>      replace file content
  append <name> <text>   append to file
  cat <name>             print file content
  ls                     list files
  stat <name>            show size and times
  rm <name>              remove file
  mv <old> <new>         rename file
  mkdir <name>           create directory
  help                   show this help
  quit                   leave";

fn main() -> Result<()> {
    // 初始化日志系统
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let registry = BackendRegistry::with_defaults();
    info!("使用后端 {}，配置={:?}", args.backend, args.config);
    let fs = registry
        .create(&args.backend, &args.config)
        .with_context(|| format!("无法初始化后端 {} (可用: {:?})", args.backend, registry.names()))?;

    let input: Box<dyn BufRead> = match &args.script {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("无法打开脚本 {:?}", path))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if matches!(line, "quit" | "exit") {
            break;
        }
        if let Err(e) = run_command(&fs, line, &mut out) {
            error!("命令失败: {}: {}", line, e);
            writeln!(out, "error: {} (code {})", e, e.code())?;
        }
    }

    fs.deinit()?;
    Ok(())
}

fn run_command(fs: &VirtualFileSystem, line: &str, out: &mut impl Write) -> vfsi::Result<()> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let (name, text) = rest.split_once(' ').unwrap_or((rest, ""));
    let usage = || FsError::Invalid(format!("bad arguments for {}, try 'help'", command));

    match command {
        "put" | "append" => {
            if name.is_empty() {
                return Err(usage());
            }
            fs.write_all(name, text.as_bytes(), command == "append")?;
        }
        "cat" => {
            let data = fs.read_to_end(name)?;
            writeln!(out, "{}", String::from_utf8_lossy(&data))?;
        }
        "ls" => {
            for entry in fs.list(rest)? {
                writeln!(out, "{:>10}  {}", entry.size, entry.name)?;
            }
        }
        "stat" => {
            let stat = fs.stat(name)?;
            writeln!(
                out,
                "size={} attr={:#x} ctime={} mtime={} atime={}",
                stat.size,
                stat.attr.bits(),
                stat.ctime,
                stat.mtime,
                stat.atime
            )?;
        }
        "rm" => fs.unlink(name)?,
        "mv" => {
            if text.is_empty() {
                return Err(usage());
            }
            fs.rename(name, text.trim())?;
        }
        "mkdir" => fs.mkdir(name, 0o755)?,
        "help" => writeln!(out, "{}", HELP)?,
        _ => return Err(usage()),
    }
    Ok(())
}
