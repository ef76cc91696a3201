use std::path::PathBuf;
use std::time::{Duration, Instant};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tempfile::TempDir;
use vfsi::{Attributes, BackendRegistry, FileSystem, OpenMode, VirtualFileSystem, Whence};

#[derive(ValueEnum, Clone, Debug, PartialEq)]
enum BackendMode {
    Ram,
    Host,
    Both,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "vfsi Benchmark Tool", long_about = None)]
struct Args {
    /// 要测试的后端
    #[arg(long, value_enum, default_value_t = BackendMode::Both)]
    mode: BackendMode,

    /// hostfs 使用的目录，默认使用临时目录
    #[arg(short = 'R', long)]
    root: Option<PathBuf>,

    /// 测试文件数量（ramfs 以扁平命名空间存放全部文件）
    #[arg(short, long, default_value = "100")]
    num_files: usize,

    /// 小文件大小（字节）
    #[arg(long, default_value = "1024")]
    small_size: usize,

    /// 大文件大小（字节）
    #[arg(long, default_value = "1048576")]
    large_size: usize,

    /// 追加写测试中每次 putc/write 的块大小
    #[arg(long, default_value = "64")]
    chunk_size: usize,
}

struct BenchmarkResult {
    operation: String,
    duration: Duration,
    ops_per_sec: f64,
    mb_per_sec: Option<f64>,
}

impl BenchmarkResult {
    fn new(operation: &str, duration: Duration, ops: usize, bytes: Option<usize>) -> Self {
        let secs = duration.as_secs_f64().max(f64::EPSILON);
        let ops_per_sec = ops as f64 / secs;
        let mb_per_sec = bytes.map(|b| (b as f64 / 1_048_576.0) / secs);

        Self {
            operation: operation.to_string(),
            duration,
            ops_per_sec,
            mb_per_sec,
        }
    }

    fn print(&self) {
        print!("  {:<30} {:>10.3} ms", self.operation, self.duration.as_secs_f64() * 1000.0);
        print!(" | {:>10.1} ops/s", self.ops_per_sec);
        if let Some(mb_per_sec) = self.mb_per_sec {
            print!(" | {:>8.2} MB/s", mb_per_sec);
        }
        println!();
    }
}

fn timed<F>(results: &mut Vec<BenchmarkResult>, name: &str, ops: usize, bytes: Option<usize>, f: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let start = Instant::now();
    f()?;
    results.push(BenchmarkResult::new(name, start.elapsed(), ops, bytes));
    Ok(())
}

fn benchmark_backend(fs: &VirtualFileSystem, args: &Args) -> Result<Vec<BenchmarkResult>> {
    let mut results = Vec::new();
    println!("\n=== {} ===", fs.name());

    let small_data = vec![b'a'; args.small_size];
    let large_data = vec![b'b'; args.large_size];
    let large_count = 10.min(args.num_files);

    // 1. 小文件写入
    println!("\n测试小文件写入 ({} 个文件, 每个 {} 字节)...", args.num_files, args.small_size);
    timed(&mut results, "小文件写入", args.num_files, Some(args.num_files * args.small_size), || {
        for i in 0..args.num_files {
            fs.write_all(&format!("small_{}", i), &small_data, false)
                .with_context(|| format!("写入 small_{} 失败", i))?;
        }
        Ok(())
    })?;

    // 2. 小文件读取
    println!("测试小文件读取...");
    timed(&mut results, "小文件读取", args.num_files, Some(args.num_files * args.small_size), || {
        for i in 0..args.num_files {
            fs.read_to_end(&format!("small_{}", i))?;
        }
        Ok(())
    })?;

    // 3. 大文件写入
    println!("\n测试大文件写入 ({} 个文件, 每个 {} 字节)...", large_count, args.large_size);
    timed(&mut results, "大文件写入", large_count, Some(large_count * args.large_size), || {
        for i in 0..large_count {
            fs.write_all(&format!("large_{}", i), &large_data, false)?;
        }
        Ok(())
    })?;

    // 4. 大文件读取
    println!("测试大文件读取...");
    timed(&mut results, "大文件读取", large_count, Some(large_count * args.large_size), || {
        for i in 0..large_count {
            fs.read_to_end(&format!("large_{}", i))?;
        }
        Ok(())
    })?;

    // 5. 小块追加写，覆盖缓冲区倍增的路径
    let chunk = vec![b'c'; args.chunk_size.max(1)];
    let appends = args.large_size / chunk.len();
    println!("\n测试追加写 ({} 次, 每次 {} 字节)...", appends, chunk.len());
    timed(&mut results, "追加写", appends, Some(appends * chunk.len()), || {
        let fh = fs.open("append", OpenMode::WRITE | OpenMode::CREATE | OpenMode::TRUNCATE, Attributes::empty())?;
        for _ in 0..appends {
            fs.write(fh, &chunk)?;
        }
        fs.close(fh)?;
        Ok(())
    })?;

    // 6. 随机 seek + getc
    println!("测试 seek + getc...");
    let seeks = 10_000;
    timed(&mut results, "seek + getc", seeks, None, || {
        let fh = fs.open("append", OpenMode::READ, Attributes::empty())?;
        let size = fs.size(fh)?.max(1) as i64;
        for i in 0..seeks as i64 {
            fs.seek(fh, (i * 7919) % size, Whence::Set)?;
            fs.getc(fh)?;
        }
        fs.close(fh)?;
        Ok(())
    })?;

    // 7. 目录列表
    println!("\n测试目录列表...");
    timed(&mut results, "目录列表（100次）", 100, None, || {
        for _ in 0..100 {
            fs.list("/")?;
        }
        Ok(())
    })?;

    // 8. 元数据获取
    println!("测试元数据获取...");
    timed(&mut results, "元数据获取", args.num_files, None, || {
        for i in 0..args.num_files {
            fs.stat(&format!("small_{}", i))?;
        }
        Ok(())
    })?;

    // 9. 文件删除
    println!("测试文件删除...");
    timed(&mut results, "文件删除", args.num_files, None, || {
        for i in 0..args.num_files {
            fs.unlink(&format!("small_{}", i))?;
        }
        Ok(())
    })?;

    // 清理
    for i in 0..large_count {
        let _ = fs.unlink(&format!("large_{}", i));
    }
    let _ = fs.unlink("append");

    Ok(results)
}

fn print_results(results: &[BenchmarkResult]) {
    println!("\n📊 性能测试结果:");
    println!("  {:<30} {:>13} | {:>16} | {:>13}", "操作", "耗时", "吞吐量", "带宽");
    println!("  {}", "-".repeat(80));
    for result in results {
        result.print();
    }
}

fn compare_results(ram_results: &[BenchmarkResult], host_results: &[BenchmarkResult]) {
    println!("\n📈 性能对比:");
    println!("  {:<30} {:>15} {:>15} {:>10}", "操作", "ramfs (ms)", "hostfs (ms)", "倍数");
    println!("  {}", "-".repeat(75));

    for (ram, host) in ram_results.iter().zip(host_results.iter()) {
        let ram_ms = ram.duration.as_secs_f64() * 1000.0;
        let host_ms = host.duration.as_secs_f64() * 1000.0;
        let ratio = host_ms / ram_ms.max(f64::EPSILON);
        println!("  {:<30} {:>15.3} {:>15.3} {:>9.1}x", ram.operation, ram_ms, host_ms, ratio);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let registry = BackendRegistry::with_defaults();

    println!("🚀 vfsi 性能基准测试");
    println!("配置：");
    println!("  测试文件数: {}", args.num_files);
    println!("  小文件大小: {} 字节", args.small_size);
    println!("  大文件大小: {} 字节", args.large_size);

    let mut ram_results = Vec::new();
    let mut host_results = Vec::new();

    if args.mode == BackendMode::Ram || args.mode == BackendMode::Both {
        let fs = registry.create("ramfs", "")?;
        ram_results = benchmark_backend(&fs, &args)?;
        print_results(&ram_results);
    }

    if args.mode == BackendMode::Host || args.mode == BackendMode::Both {
        // 未指定目录时使用临时目录，结束后自动删除
        let temp_dir = TempDir::new()?;
        let root = args.root.clone().unwrap_or_else(|| temp_dir.path().to_path_buf());
        println!("  hostfs 目录: {:?}", root);
        let fs = registry.create("hostfs", &format!("root={}", root.display()))?;
        host_results = benchmark_backend(&fs, &args)?;
        print_results(&host_results);
    }

    if args.mode == BackendMode::Both && !ram_results.is_empty() && !host_results.is_empty() {
        compare_results(&ram_results, &host_results);
    }

    println!("\n✅ 基准测试完成！");
    Ok(())
}
