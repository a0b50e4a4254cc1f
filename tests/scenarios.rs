//! End-to-end scenarios driving `EventLoop` against the `sim` backends,
//! covering the cross-subsystem paths a single module's unit tests
//! can't reach alone (spec §8).

use sos_root::config::Config;
use sos_root::ipc::{Message, SyscallLabel};
use sos_root::kernel_if::{KernelOps, ThreadId};
use sos_root::pager::FaultKind;
use sos_root::sim::{SimDisk, SimKernel, SimNet};
use sos_root::syscall::EventLoop;

fn spawn(event_loop: &mut EventLoop, kernel: &mut SimKernel, name: &str) -> (sos_root::pcb::Pid, ThreadId) {
    let (tid, space) = kernel.thread_create(0x400000, 0x7fff_f000, ThreadId(0));
    let pid = event_loop.processes.create(tid, space, name.to_string());
    (pid, tid)
}

#[test]
fn hello_world_open_write_close_round_trip() {
    let mut event_loop = EventLoop::new(&Config::default());
    let mut kernel = SimKernel::new();
    let mut disk = SimDisk::new();
    let mut net = SimNet::new();
    let (pid, tid) = spawn(&mut event_loop, &mut kernel, "hello");

    event_loop.processes.get_mut(pid).unwrap().shared_buffer.write_path("console").unwrap();
    let open_reply = event_loop
        .dispatch(
            &mut net,
            &mut kernel,
            Message {
                from: tid,
                label: SyscallLabel::Open,
                args: [0, 0b11, 0, 0],
            },
            0,
        )
        .expect("console open completes synchronously");
    assert!(open_reply.value >= 0, "fd should be non-negative, got {}", open_reply.value);
    let fd = open_reply.value;

    event_loop.processes.get_mut(pid).unwrap().shared_buffer.copyout(0, b"ping").unwrap();
    let write_reply = event_loop
        .dispatch(
            &mut net,
            &mut kernel,
            Message {
                from: tid,
                label: SyscallLabel::Write,
                args: [fd, 4, 0, 0],
            },
            0,
        )
        .expect("console write completes synchronously");
    assert_eq!(write_reply.value, 4);

    let close_reply = event_loop
        .dispatch(
            &mut net,
            &mut kernel,
            Message {
                from: tid,
                label: SyscallLabel::Close,
                args: [fd, 0, 0, 0],
            },
            0,
        )
        .expect("close completes synchronously");
    assert_eq!(close_reply.value, 0);
    let _ = disk;
}

#[test]
fn console_second_reader_gets_readfull_until_first_completes() {
    // Two processes may each hold the console open for reading; it's the
    // *outstanding read* that is capped at one (spec §4.8), independent
    // of the v-node's own reader-count cap.
    let config = Config {
        console_reader_cap: 2,
        ..Config::default()
    };
    let mut event_loop = EventLoop::new(&config);
    let mut kernel = SimKernel::new();
    let mut net = SimNet::new();
    let (reader_one_pid, reader_one) = spawn(&mut event_loop, &mut kernel, "r1");
    let (reader_two_pid, reader_two) = spawn(&mut event_loop, &mut kernel, "r2");

    for (pid, tid) in [(reader_one_pid, reader_one), (reader_two_pid, reader_two)] {
        event_loop.processes.get_mut(pid).unwrap().shared_buffer.write_path("console").unwrap();
        event_loop.dispatch(
            &mut net,
            &mut kernel,
            Message {
                from: tid,
                label: SyscallLabel::Open,
                args: [0, 0b01, 0, 0],
            },
            0,
        );
    }

    let first_read = event_loop.dispatch(
        &mut net,
        &mut kernel,
        Message {
            from: reader_one,
            label: SyscallLabel::Read,
            args: [0, 16, 0, 0],
        },
        0,
    );
    assert!(first_read.is_none(), "console read should block on input");

    let second_read = event_loop
        .dispatch(
            &mut net,
            &mut kernel,
            Message {
                from: reader_two,
                label: SyscallLabel::Read,
                args: [0, 16, 0, 0],
            },
            0,
        )
        .expect("second concurrent reader fails immediately");
    assert_eq!(second_read.value, sos_root::SosError::ReadFull.wire_code() as i64);

    event_loop.vfs.console.feed_input(b"hi\n");
    let driver_replies = event_loop.poll_drivers(&mut net);
    assert_eq!(driver_replies.len(), 1);
    assert_eq!(driver_replies[0].tid, reader_one);
}

#[test]
fn nfs_open_for_write_retries_as_create_on_lookup_miss() {
    let mut event_loop = EventLoop::new(&Config::default());
    let mut kernel = SimKernel::new();
    let mut net = SimNet::new();
    let (pid, tid) = spawn(&mut event_loop, &mut kernel, "nfs-client");

    event_loop.processes.get_mut(pid).unwrap().shared_buffer.write_path("/remote/file").unwrap();
    let open_reply = event_loop.dispatch(
        &mut net,
        &mut kernel,
        Message {
            from: tid,
            label: SyscallLabel::Open,
            args: [0, 0b10, 0, 0],
        },
        0,
    );
    assert!(open_reply.is_none(), "NFS open is asynchronous");

    // First drain only harvests the lookup miss, which resubmits as a
    // create internally without surfacing a reply yet.
    let first_drain = event_loop.poll_drivers(&mut net);
    assert!(first_drain.is_empty(), "lookup miss should resubmit as create, not reply yet");

    let replies = event_loop.poll_drivers(&mut net);
    assert_eq!(replies.len(), 1, "second drain should harvest the create's completion");
    assert!(replies[0].value >= 0);
}

#[test]
fn process_wait_is_woken_by_process_delete() {
    let mut event_loop = EventLoop::new(&Config::default());
    let mut kernel = SimKernel::new();
    let mut net = SimNet::new();
    let (target_pid, _) = spawn(&mut event_loop, &mut kernel, "target");
    let (waiter_pid, waiter_tid) = spawn(&mut event_loop, &mut kernel, "waiter");

    let wait_reply = event_loop.dispatch(
        &mut net,
        &mut kernel,
        Message {
            from: waiter_tid,
            label: SyscallLabel::ProcessWait,
            args: [target_pid.0 as i64, 0, 0, 0],
        },
        0,
    );
    assert!(wait_reply.is_none(), "wait on a live process blocks");

    let woken = event_loop
        .processes
        .delete(
            target_pid,
            &mut event_loop.vfs,
            &mut net,
            &mut event_loop.pager.frames,
            &mut event_loop.pager.swap,
            &mut kernel,
        )
        .unwrap();
    assert_eq!(woken, vec![waiter_pid]);
}

#[test]
fn process_create_reserves_a_pcb_and_process_status_counts_it() {
    let mut event_loop = EventLoop::new(&Config::default());
    let mut kernel = SimKernel::new();
    let mut net = SimNet::new();
    let (_, parent_tid) = spawn(&mut event_loop, &mut kernel, "parent");

    let create_reply = event_loop
        .dispatch(
            &mut net,
            &mut kernel,
            Message {
                from: parent_tid,
                label: SyscallLabel::ProcessCreate,
                args: [0x400000, 0x7fff_f000, 0, 0],
            },
            0,
        )
        .expect("process_create replies synchronously");
    assert!(create_reply.value > 0, "expected a fresh pid, got {}", create_reply.value);

    let status_reply = event_loop
        .dispatch(
            &mut net,
            &mut kernel,
            Message {
                from: parent_tid,
                label: SyscallLabel::ProcessStatus,
                args: [16, 0, 0, 0],
            },
            0,
        )
        .expect("process_status replies synchronously");
    assert_eq!(status_reply.value, 2, "parent plus the freshly created child");
}

#[test]
fn usleep_blocks_until_tick_past_deadline() {
    let mut event_loop = EventLoop::new(&Config::default());
    let mut kernel = SimKernel::new();
    let mut net = SimNet::new();
    let (_, tid) = spawn(&mut event_loop, &mut kernel, "sleeper");

    let sleep_reply = event_loop.dispatch(
        &mut net,
        &mut kernel,
        Message {
            from: tid,
            label: SyscallLabel::USleep,
            args: [10, 0, 0, 0],
        },
        0,
    );
    assert!(sleep_reply.is_none(), "usleep blocks the caller");

    assert!(event_loop.tick(5).is_empty(), "deadline not reached yet");
    let woken = event_loop.tick(10);
    assert_eq!(woken.len(), 1);
    assert_eq!(woken[0].tid, tid);
    assert_eq!(woken[0].value, 0);
}

#[test]
fn process_delete_via_dispatch_wakes_waiter_through_poll_waits() {
    let mut event_loop = EventLoop::new(&Config::default());
    let mut kernel = SimKernel::new();
    let mut net = SimNet::new();
    let (target_pid, target_tid) = spawn(&mut event_loop, &mut kernel, "target");
    let (_, waiter_tid) = spawn(&mut event_loop, &mut kernel, "waiter");

    let wait_reply = event_loop.dispatch(
        &mut net,
        &mut kernel,
        Message {
            from: waiter_tid,
            label: SyscallLabel::ProcessWait,
            args: [target_pid.0 as i64, 0, 0, 0],
        },
        0,
    );
    assert!(wait_reply.is_none());

    let delete_reply = event_loop
        .dispatch(
            &mut net,
            &mut kernel,
            Message {
                from: target_tid,
                label: SyscallLabel::ProcessDelete,
                args: [target_pid.0 as i64, 0, 0, 0],
            },
            0,
        )
        .expect("process_delete replies to its own caller synchronously");
    assert_eq!(delete_reply.value, 0);

    let woken = event_loop.poll_waits();
    assert_eq!(woken.len(), 1);
    assert_eq!(woken[0].tid, waiter_tid);
    assert_eq!(woken[0].value, target_pid.0 as i64);
}

#[test]
fn page_fault_outside_any_region_segfaults() {
    let mut event_loop = EventLoop::new(&Config::default());
    let mut kernel = SimKernel::new();
    let mut disk = SimDisk::new();
    let (pid, _) = spawn(&mut event_loop, &mut kernel, "faulter");

    let outcome = event_loop.handle_page_fault(&mut kernel, &mut disk, pid, 0x9000, FaultKind::Read);
    assert!(matches!(outcome, sos_root::pager::FaultOutcome::SegFault));
}
