// SPDX-License-Identifier: MPL-2.0

//! Process lifecycle and the system-call boundary.

use std::sync::Arc;

use vireo_kernel::fs::{self, inode, File, FsNode};
use vireo_kernel::process::{self, build_image, register_program};
use vireo_kernel::syscall::nr;
use vireo_kernel::{console, thread, BootOptions, Kernel};

fn open_file(path: &str) -> Arc<File> {
    match fs::open(path).expect("open failed") {
        FsNode::File(f) => f,
        FsNode::Dir(_) => panic!("{} is a directory", path),
    }
}

fn write_file(path: &str, bytes: &[u8]) {
    fs::create(path, 0).unwrap();
    let f = open_file(path);
    assert_eq!(f.write_at(bytes, 0), bytes.len());
}

fn install_program(name: &str, f: process::ProgramFn) {
    register_program(name, f);
    write_file(name, &build_image(name, &[]));
}

#[test]
fn entry_return_value_becomes_exit_status() {
    let _kernel = Kernel::boot(BootOptions::default());
    install_program("return-42", |_ctx| 42);

    console::take_output();
    let pid = process::exec("return-42").unwrap();
    assert_eq!(process::wait(pid), 42);

    let out = String::from_utf8_lossy(&console::take_output()).into_owned();
    assert!(out.contains("return-42: exit(42)"), "got: {}", out);
}

#[test]
fn exit_syscall_carries_its_status() {
    let _kernel = Kernel::boot(BootOptions::default());
    install_program("exiter", |ctx| ctx.exit(7));
    let pid = process::exec("exiter").unwrap();
    assert_eq!(process::wait(pid), 7);
}

#[test]
fn arguments_are_marshalled_onto_the_stack() {
    let _kernel = Kernel::boot(BootOptions::default());

    install_program("argtest", |ctx| {
        let esp = ctx.esp;
        // [fake return][argc][argv]
        if ctx.read_u32(esp) != 0 {
            return 90;
        }
        let argc = ctx.read_u32(esp + 4) as usize;
        let argv = ctx.read_u32(esp + 8) as usize;
        if argv % 4 != 0 {
            return 91;
        }
        // argv[argc] is the NULL sentinel.
        if ctx.read_u32(argv + 4 * argc) != 0 {
            return 92;
        }
        let expect = ["argtest", "one", "two2", "three"];
        if argc != expect.len() {
            return 93;
        }
        for (i, want) in expect.iter().enumerate() {
            let mut ptr = ctx.read_u32(argv + 4 * i) as usize;
            let mut got = String::new();
            loop {
                let c = ctx.read_u8(ptr);
                if c == 0 {
                    break;
                }
                got.push(c as char);
                ptr += 1;
            }
            if got != *want {
                return 94 + i as i32;
            }
        }
        argc as i32
    });

    let pid = process::exec("argtest one two2 three").unwrap();
    assert_eq!(process::wait(pid), 4);
}

#[test]
fn wait_succeeds_at_most_once() {
    let _kernel = Kernel::boot(BootOptions::default());
    install_program("quick", |_ctx| 3);
    let pid = process::exec("quick").unwrap();
    assert_eq!(process::wait(pid), 3);
    assert_eq!(process::wait(pid), -1);
    assert_eq!(process::wait(9999), -1);
}

#[test]
fn wait_rejects_other_peoples_children() {
    let _kernel = Kernel::boot(BootOptions::default());
    install_program("return-42", |_ctx| 3);
    install_program("middleman", |ctx| ctx.exec("return-42"));

    let pid = process::exec("middleman").unwrap();
    let grandchild = process::wait(pid);
    assert!(grandchild > 0);
    // The grandchild is not our child.
    assert_eq!(process::wait(grandchild), -1);

    // Let the orphan run to completion before teardown.
    for _ in 0..10 {
        thread::yield_now();
    }
}

#[test]
fn bad_pointer_kills_with_minus_one() {
    let _kernel = Kernel::boot(BootOptions::default());
    install_program("bad-open", |ctx| {
        ctx.syscall(nr::SYS_OPEN, 0xC000_0000, 0, 0);
        55 // never reached
    });

    console::take_output();
    let pid = process::exec("bad-open").unwrap();
    assert_eq!(process::wait(pid), -1);
    let out = String::from_utf8_lossy(&console::take_output()).into_owned();
    assert!(out.contains("bad-open: exit(-1)"), "got: {}", out);
}

#[test]
fn unknown_syscall_number_kills() {
    let _kernel = Kernel::boot(BootOptions::default());
    install_program("wildcall", |ctx| {
        ctx.syscall(999, 0, 0, 0);
        56
    });
    let pid = process::exec("wildcall").unwrap();
    assert_eq!(process::wait(pid), -1);
}

#[test]
fn exec_of_missing_or_bogus_images_fails() {
    let _kernel = Kernel::boot(BootOptions::default());
    assert!(process::exec("nosuchprog").is_err());

    // A real file that is not an image.
    write_file("notimage", b"plain text, not code");
    assert!(process::exec("notimage").is_err());

    // An image naming an entry nobody registered.
    write_file("ghost", &build_image("ghost", &[]));
    assert!(process::exec("ghost").is_err());
}

#[test]
fn descriptors_are_unique_and_closed_on_exit() {
    let _kernel = Kernel::boot(BootOptions::default());
    write_file("data", b"0123456789");

    install_program("fdprog", |ctx| {
        let a = ctx.open("data");
        let b = ctx.open("data");
        if a < 2 || b < 2 || a == b {
            return 80;
        }
        if ctx.filesize(a) != 10 {
            return 81;
        }
        // Leak both on purpose; exit must close them.
        0
    });

    let pid = process::exec("fdprog").unwrap();
    assert_eq!(process::wait(pid), 0);
    assert_eq!(inode::open_inode_count(), 0, "exit must close descriptors");
}

#[test]
fn double_close_kills() {
    let _kernel = Kernel::boot(BootOptions::default());
    write_file("data", b"x");
    install_program("closetwice", |ctx| {
        let fd = ctx.open("data");
        ctx.close(fd);
        ctx.close(fd);
        57 // never reached
    });
    let pid = process::exec("closetwice").unwrap();
    assert_eq!(process::wait(pid), -1);
}

#[test]
fn console_io_round_trips() {
    let _kernel = Kernel::boot(BootOptions::default());
    console::push_input(b"hi");

    install_program("ioprog", |ctx| {
        ctx.esp -= 64;
        let buf = ctx.esp;
        let n = ctx.read(0, buf, 16);
        if n != 2 {
            return 85;
        }
        if ctx.write(1, buf, 2) != 2 {
            return 86;
        }
        0
    });

    console::take_output();
    let pid = process::exec("ioprog").unwrap();
    assert_eq!(process::wait(pid), 0);
    let out = String::from_utf8_lossy(&console::take_output()).into_owned();
    assert!(out.contains("hi"), "got: {}", out);
}

#[test]
fn file_positions_via_syscalls() {
    let _kernel = Kernel::boot(BootOptions::default());
    write_file("posfile", b"abcdefgh");

    install_program("posprog", |ctx| {
        let fd = ctx.open("posfile");
        if ctx.tell(fd) != 0 {
            return 95;
        }
        ctx.seek(fd, 6);
        if ctx.tell(fd) != 6 {
            return 96;
        }
        ctx.esp -= 16;
        let buf = ctx.esp;
        if ctx.read(fd, buf, 8) != 2 {
            return 97; // short read at EOF
        }
        if ctx.read_u8(buf) != b'g' || ctx.read_u8(buf + 1) != b'h' {
            return 98;
        }
        ctx.close(fd);
        0
    });

    let pid = process::exec("posprog").unwrap();
    assert_eq!(process::wait(pid), 0);
}

#[test]
fn halt_stops_the_machine() {
    let kernel = Kernel::boot(BootOptions::default());
    install_program("halter", |ctx| ctx.halt());

    let pid = process::exec("halter").unwrap();
    assert_eq!(process::wait(pid), -1);
    assert!(kernel.halted());
}

#[test]
fn directory_calls_work_through_the_boundary() {
    let _kernel = Kernel::boot(BootOptions::default());

    install_program("dirprog", |ctx| {
        if !ctx.mkdir("sub") {
            return 100;
        }
        if !ctx.chdir("sub") {
            return 101;
        }
        if !ctx.create("f", 10) {
            return 102;
        }
        let fd = ctx.open("f");
        if fd < 2 {
            return 103;
        }
        if ctx.isdir(fd) {
            return 104;
        }
        if ctx.inumber(fd) <= 1 {
            return 105;
        }
        ctx.close(fd);

        let root = ctx.open("/");
        if root < 2 || !ctx.isdir(root) {
            return 106;
        }
        let mut names = Vec::new();
        while let Some(name) = ctx.readdir(root) {
            names.push(name);
        }
        if !names.iter().any(|n| n == "sub") {
            return 107;
        }
        if names.iter().any(|n| n == "." || n == "..") {
            return 108;
        }
        ctx.close(root);

        // A freshly created file in the cwd resolves relatively.
        let again = ctx.open("/sub/f");
        if again < 2 {
            return 109;
        }
        ctx.close(again);
        0
    });

    let pid = process::exec("dirprog").unwrap();
    assert_eq!(process::wait(pid), 0);
}

#[test]
fn orphans_outlive_their_parent() {
    let _kernel = Kernel::boot(BootOptions::default());
    install_program("slow-child", |ctx| {
        // Parent will be gone by the time this exits.
        ctx.esp -= 64;
        3
    });
    install_program("leaver", |ctx| {
        let child = ctx.exec("slow-child");
        if child < 0 {
            return 110;
        }
        // Exit without waiting: the child is orphaned.
        0
    });

    let pid = process::exec("leaver").unwrap();
    assert_eq!(process::wait(pid), 0);
    for _ in 0..10 {
        thread::yield_now();
    }
    // Nothing to assert beyond "no crash": the orphan freed itself.
}
