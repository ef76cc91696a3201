//! 对所有内置后端运行同一组用例，检查它们可以互相替换

use tempfile::TempDir;
use crate::error::{code, status, FsError};
use crate::fs::{Attributes, FileHandle, FileSystem, OpenMode, VirtualFileSystem, Whence};
use crate::{HostFs, RamFs};

struct Fixture {
    fs: VirtualFileSystem,
    // 必须在 fs 之后 drop
    _dir: Option<TempDir>,
}

fn backends() -> Vec<Fixture> {
    let ramfs = VirtualFileSystem::new(Box::new(RamFs::new()));
    ramfs.init("").unwrap();

    let dir = TempDir::new().unwrap();
    let hostfs = VirtualFileSystem::new(Box::new(HostFs::new(dir.path())));
    hostfs.init("").unwrap();

    vec![
        Fixture { fs: ramfs, _dir: None },
        Fixture { fs: hostfs, _dir: Some(dir) },
    ]
}

fn rw_create(fs: &VirtualFileSystem, name: &str) -> FileHandle {
    fs.open(name, OpenMode::RDWR | OpenMode::CREATE, Attributes::empty())
        .unwrap()
}

#[test]
fn test_round_trip_various_sizes() {
    for f in backends() {
        let fs = &f.fs;
        for n in [0usize, 1, 2, 63, 255, 256, 257, 511, 1000, 4096, 10_000] {
            let data: Vec<u8> = (0..n).map(|i| (i * 31 % 251) as u8).collect();
            let name = format!("file_{}", n);
            fs.write_all(&name, &data, false).unwrap();
            assert_eq!(fs.read_to_end(&name).unwrap(), data, "{} size {}", fs.name(), n);
            assert_eq!(fs.stat(&name).unwrap().size as usize, n);
        }
    }
}

#[test]
fn test_read_is_short_at_end() {
    for f in backends() {
        let fs = &f.fs;
        let fh = rw_create(fs, "short");
        assert_eq!(fs.write(fh, b"hello").unwrap(), 5);
        fs.seek(fh, 0, Whence::Set).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(fs.read(fh, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(fs.read(fh, &mut buf).unwrap(), 0);
        assert!(fs.eof(fh).unwrap());
        fs.close(fh).unwrap();
    }
}

#[test]
fn test_truncate_on_open() {
    for f in backends() {
        let fs = &f.fs;
        fs.write_all("t", b"0123456789", false).unwrap();

        // 只有 READ/WRITE 时不清空
        let fh = fs.open("t", OpenMode::RDWR, Attributes::empty()).unwrap();
        assert_eq!(fs.size(fh).unwrap(), 10);
        fs.close(fh).unwrap();

        let fh = fs
            .open("t", OpenMode::RDWR | OpenMode::CREATE | OpenMode::TRUNCATE, Attributes::empty())
            .unwrap();
        assert_eq!(fs.size(fh).unwrap(), 0);
        fs.write(fh, b"ab").unwrap();
        fs.close(fh).unwrap();
        assert_eq!(fs.read_to_end("t").unwrap(), b"ab");
    }
}

#[test]
fn test_append_starts_at_end() {
    for f in backends() {
        let fs = &f.fs;
        fs.write_all("log", b"one,", false).unwrap();
        fs.write_all("log", b"two", true).unwrap();
        assert_eq!(fs.read_to_end("log").unwrap(), b"one,two");

        let fh = fs
            .open("log", OpenMode::RDWR | OpenMode::APPEND, Attributes::empty())
            .unwrap();
        assert_eq!(fs.tell(fh).unwrap(), 7);
        fs.close(fh).unwrap();
    }
}

#[test]
fn test_missing_file_is_not_found() {
    for f in backends() {
        let fs = &f.fs;
        assert!(matches!(fs.open("nope", OpenMode::READ, Attributes::empty()), Err(FsError::NotFound(_))));
        assert!(matches!(fs.stat("nope"), Err(FsError::NotFound(_))));
        assert!(matches!(fs.unlink("nope"), Err(FsError::NotFound(_))));
        assert!(matches!(fs.rename("nope", "other"), Err(FsError::NotFound(_))));
        assert_eq!(status(&fs.stat("nope")), code::NOT_FOUND);
    }
}

#[test]
fn test_unlink_removes_file() {
    for f in backends() {
        let fs = &f.fs;
        fs.write_all("gone", b"x", false).unwrap();
        fs.unlink("gone").unwrap();
        assert!(matches!(fs.stat("gone"), Err(FsError::NotFound(_))));
        assert!(fs.list("/").unwrap().is_empty());
    }
}

#[test]
fn test_rename() {
    for f in backends() {
        let fs = &f.fs;
        fs.write_all("a", b"alpha", false).unwrap();
        fs.write_all("b", b"beta", false).unwrap();

        let err = fs.rename("a", "b").unwrap_err();
        assert_eq!(err.code(), code::EXISTS);
        assert_eq!(fs.read_to_end("a").unwrap(), b"alpha");
        assert_eq!(fs.read_to_end("b").unwrap(), b"beta");

        fs.rename("a", "a").unwrap();
        fs.rename("a", "c").unwrap();
        assert!(matches!(fs.stat("a"), Err(FsError::NotFound(_))));
        assert_eq!(fs.read_to_end("c").unwrap(), b"alpha");
    }
}

#[test]
fn test_rename_keeps_open_handle() {
    for f in backends() {
        let fs = &f.fs;
        fs.write_all("before", b"abcdef", false).unwrap();
        let fh = fs.open("before", OpenMode::RDWR, Attributes::empty()).unwrap();
        fs.seek(fh, 2, Whence::Set).unwrap();

        fs.rename("before", "after").unwrap();
        assert_eq!(fs.tell(fh).unwrap(), 2);
        assert_eq!(fs.size(fh).unwrap(), 6);
        assert_eq!(fs.getc(fh).unwrap(), Some(b'c'));

        // 改名后继续写入同一个文件
        fs.write(fh, b"D").unwrap();
        fs.close(fh).unwrap();
        assert_eq!(fs.read_to_end("after").unwrap(), b"abcDef");
        assert!(matches!(fs.stat("before"), Err(FsError::NotFound(_))));
    }
}

#[test]
fn test_write_requires_write_mode() {
    for f in backends() {
        let fs = &f.fs;
        fs.write_all("ro", b"abc", false).unwrap();
        let fh = fs.open("ro", OpenMode::READ, Attributes::empty()).unwrap();

        let err = fs.write(fh, b"Z").unwrap_err();
        assert_eq!(err.code(), code::INVALID, "{}", fs.name());
        assert_eq!(fs.error(fh).unwrap(), Some(code::INVALID));
        assert!(matches!(fs.putc(fh, b'Z'), Err(FsError::Invalid(_))));

        // 读不受影响，seek 清除错误
        assert_eq!(fs.getc(fh).unwrap(), Some(b'a'));
        fs.seek(fh, 0, Whence::Set).unwrap();
        assert_eq!(fs.error(fh).unwrap(), None);
        fs.close(fh).unwrap();
        assert_eq!(fs.read_to_end("ro").unwrap(), b"abc");

        let wo = fs.open("ro", OpenMode::WRITE, Attributes::empty()).unwrap();
        assert_eq!(fs.write(wo, b"X").unwrap(), 1);
        fs.close(wo).unwrap();
        assert_eq!(fs.read_to_end("ro").unwrap(), b"Xbc");
    }
}

#[test]
fn test_sparse_seek_and_write() {
    for f in backends() {
        let fs = &f.fs;
        let fh = rw_create(fs, "sparse");
        fs.write(fh, b"abc").unwrap();

        assert_eq!(fs.seek(fh, 10, Whence::Set).unwrap(), 10);
        let mut buf = [0u8; 4];
        assert_eq!(fs.read(fh, &mut buf).unwrap(), 0);
        assert_eq!(fs.size(fh).unwrap(), 3);

        fs.write(fh, b"Z").unwrap();
        assert_eq!(fs.size(fh).unwrap(), 11);
        fs.close(fh).unwrap();

        let data = fs.read_to_end("sparse").unwrap();
        assert_eq!(&data[..3], b"abc");
        assert!(data[3..10].iter().all(|&b| b == 0));
        assert_eq!(data[10], b'Z');
    }
}

#[test]
fn test_seek_whence_and_negative() {
    for f in backends() {
        let fs = &f.fs;
        let fh = rw_create(fs, "s");
        fs.write(fh, b"0123456789").unwrap();

        assert_eq!(fs.seek(fh, -3, Whence::End).unwrap(), 7);
        assert_eq!(fs.seek(fh, -2, Whence::Cur).unwrap(), 5);
        assert_eq!(fs.getc(fh).unwrap(), Some(b'5'));

        let err = fs.seek(fh, -1, Whence::Set).unwrap_err();
        assert_eq!(err.code(), code::INVALID);
        assert_eq!(fs.tell(fh).unwrap(), 6);
        fs.close(fh).unwrap();
    }
}

#[test]
fn test_handles_have_independent_cursors() {
    for f in backends() {
        let fs = &f.fs;
        fs.write_all("shared", b"abcdef", false).unwrap();
        let h1 = fs.open("shared", OpenMode::READ, Attributes::empty()).unwrap();
        let h2 = fs.open("shared", OpenMode::READ, Attributes::empty()).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(fs.read(h1, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(fs.tell(h2).unwrap(), 0);
        assert_eq!(fs.read(h2, &mut buf[..2]).unwrap(), 2);
        assert_eq!(&buf[..2], b"ab");
        assert_eq!(fs.tell(h1).unwrap(), 4);

        fs.close(h1).unwrap();
        fs.close(h2).unwrap();
    }
}

#[test]
fn test_closed_handle_is_invalid() {
    for f in backends() {
        let fs = &f.fs;
        let fh = rw_create(fs, "c");
        fs.close(fh).unwrap();

        let mut buf = [0u8; 1];
        assert!(matches!(fs.read(fh, &mut buf), Err(FsError::Invalid(_))));
        assert!(matches!(fs.write(fh, b"x"), Err(FsError::Invalid(_))));
        assert!(matches!(fs.tell(fh), Err(FsError::Invalid(_))));
        assert!(matches!(fs.close(fh), Err(FsError::Invalid(_))));

        // 新句柄不会复活旧句柄
        let again = rw_create(fs, "c");
        assert_ne!(again, fh);
        assert!(matches!(fs.tell(fh), Err(FsError::Invalid(_))));
        fs.close(again).unwrap();
    }
}

#[test]
fn test_readdir_lists_each_file_once() {
    for f in backends() {
        let fs = &f.fs;
        for name in ["b", "a", "c"] {
            fs.write_all(name, name.as_bytes(), false).unwrap();
        }
        fs.write_all("a", b"longer", false).unwrap();

        let dh = fs.opendir("/").unwrap();
        let mut names = Vec::new();
        while let Some(entry) = fs.readdir(dh).unwrap() {
            if entry.name == "a" {
                assert_eq!(entry.size, 6);
            }
            names.push(entry.name);
        }
        assert_eq!(names, vec!["a", "b", "c"]);
        // 结束后继续返回 None
        assert_eq!(fs.readdir(dh).unwrap(), None);
        fs.closedir(dh).unwrap();
        assert!(matches!(fs.readdir(dh), Err(FsError::Invalid(_))));
        assert!(matches!(fs.closedir(dh), Err(FsError::Invalid(_))));
    }
}

#[test]
fn test_getc_putc_eof() {
    for f in backends() {
        let fs = &f.fs;
        let fh = rw_create(fs, "chars");
        for byte in b"xyz" {
            assert_eq!(fs.putc(fh, *byte).unwrap(), *byte);
        }
        assert_eq!(fs.tell(fh).unwrap(), 3);
        assert!(fs.eof(fh).unwrap());

        fs.seek(fh, 0, Whence::Set).unwrap();
        assert!(!fs.eof(fh).unwrap());
        assert_eq!(fs.getc(fh).unwrap(), Some(b'x'));
        assert_eq!(fs.getc(fh).unwrap(), Some(b'y'));
        assert_eq!(fs.getc(fh).unwrap(), Some(b'z'));
        assert_eq!(fs.getc(fh).unwrap(), None);
        assert_eq!(fs.error(fh).unwrap(), None);
        fs.flush(fh).unwrap();
        fs.sync(fh).unwrap();
        fs.close(fh).unwrap();
    }
}

#[test]
fn test_zero_length_write_is_noop() {
    for f in backends() {
        let fs = &f.fs;
        let fh = rw_create(fs, "empty");
        fs.seek(fh, 100, Whence::Set).unwrap();
        assert_eq!(fs.write(fh, b"").unwrap(), 0);
        assert_eq!(fs.size(fh).unwrap(), 0);
        fs.close(fh).unwrap();
        assert_eq!(fs.stat("empty").unwrap().size, 0);
    }
}

#[test]
fn test_ioctl_is_unsupported() {
    for f in backends() {
        let fs = &f.fs;
        let fh = rw_create(fs, "dev");
        let mut arg = [0u8; 4];
        assert_eq!(fs.ioctl(fh, 1, &mut arg).unwrap_err().code(), code::GENERAL);
        fs.close(fh).unwrap();
    }
}

#[test]
fn test_long_names_rejected_on_create() {
    for f in backends() {
        let fs = &f.fs;
        let long = "n".repeat(64);
        let err = fs
            .open(&long, OpenMode::RDWR | OpenMode::CREATE, Attributes::empty())
            .unwrap_err();
        assert_eq!(err.code(), code::INVALID);
        assert!(matches!(fs.open("", OpenMode::RDWR | OpenMode::CREATE, Attributes::empty()), Err(FsError::Invalid(_))));

        fs.write_all("short", b"s", false).unwrap();
        assert_eq!(fs.rename("short", &long).unwrap_err().code(), code::INVALID);
        assert_eq!(fs.read_to_end("short").unwrap(), b"s");
    }
}

#[test]
fn test_reinit_and_deinit_lifecycle() {
    for f in backends() {
        let fs = &f.fs;
        let fh = rw_create(fs, "x");

        // 重复 init 不影响已有状态
        fs.init("").unwrap();
        assert_eq!(fs.tell(fh).unwrap(), 0);

        fs.deinit().unwrap();
        fs.deinit().unwrap();
        assert!(!fs.is_initialized());
        assert_eq!(status(&fs.stat("x")), code::GENERAL);
        assert!(matches!(fs.open("x", OpenMode::READ, Attributes::empty()), Err(FsError::NotInitialized)));

        fs.init("").unwrap();
        assert!(matches!(fs.tell(fh), Err(FsError::Invalid(_))));
    }
}

#[test]
fn test_status_codes() {
    for f in backends() {
        let fs = &f.fs;
        fs.write_all("one", b"1", false).unwrap();
        assert_eq!(status(&fs.stat("one")), code::OK);
        assert_eq!(status(&fs.rename("one", "one")), code::OK);
        fs.write_all("two", b"2", false).unwrap();
        assert_eq!(status(&fs.rename("one", "two")), code::EXISTS);
        assert_eq!(status(&fs.unlink("three")), code::NOT_FOUND);
    }
}
