//! A small standalone driver that wires `EventLoop` to the `sim`
//! backends and runs through a hello-world-ish scenario: create a
//! process, open the console, write a line, read it back, exit.

use sos_root::config::Config;
use sos_root::ipc::{Message, SyscallLabel};
use sos_root::irq::IrqSource;
use sos_root::kernel_if::{KernelOps, SpaceId, ThreadId};
use sos_root::sim::{SimDisk, SimKernel, SimNet};
use sos_root::syscall::EventLoop;

const CONSOLE_IRQ: u32 = 1;

fn main() {
    env_logger::init();

    let config = Config::default();
    let mut event_loop = EventLoop::new(&config);
    let mut kernel = SimKernel::new();
    let mut disk = SimDisk::new();
    let mut net = SimNet::new();

    event_loop.register_irq(&mut kernel, CONSOLE_IRQ, IrqSource::Console).unwrap();

    let (tid, space) = kernel.thread_create(0x400000, 0x7fff_f000, ThreadId(0));
    let pid = event_loop.processes.create(tid, space, "hello".to_string());
    log::info!("spawned pid {} as thread {:?} in space {:?}", pid.0, tid, space);

    event_loop.processes.get_mut(pid).unwrap().shared_buffer.write_path("console").unwrap();
    let open_msg = Message {
        from: tid,
        label: SyscallLabel::Open,
        args: [0, 0b11, 0, 0],
    };
    if let Some(reply) = event_loop.dispatch(&mut net, &mut kernel, open_msg, kernel.tick()) {
        log::info!("open() -> {}", reply.value);
    }

    event_loop.processes.get_mut(pid).unwrap().shared_buffer.copyout(0, b"hello").unwrap();
    let write_msg = Message {
        from: tid,
        label: SyscallLabel::Write,
        args: [0, 5, 0, 0],
    };
    if let Some(reply) = event_loop.dispatch(&mut net, &mut kernel, write_msg, kernel.tick()) {
        log::info!("write() -> {}", reply.value);
    }

    let replies = event_loop.dispatch_irq(&mut net, &mut disk, &mut kernel, CONSOLE_IRQ, kernel.tick());
    for reply in replies {
        log::info!("driver reply for {:?}: {}", reply.tid, reply.value);
    }

    let delete_msg = Message {
        from: tid,
        label: SyscallLabel::ProcessDelete,
        args: [pid.0 as i64, 0, 0, 0],
    };
    if let Some(reply) = event_loop.dispatch(&mut net, &mut kernel, delete_msg, kernel.tick()) {
        log::info!("process_delete() -> {}", reply.value);
    }
    for reply in event_loop.poll_waits() {
        log::info!("woke waiter {:?} with {}", reply.tid, reply.value);
    }
}
