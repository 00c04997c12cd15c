// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios over the simulated platform: a booted user world issuing
//! syscalls, faulting and being restarted.

use alloc::string::String;

use privsep_abi::{
    CleanupItem, DispatchMsg, Sysno, TaskCtx, QUEUE_TYPE_CLEANUP, QUEUE_TYPE_DISPATCH,
};

use crate::config::{Config, Policy};
use crate::context::PrivSep;
use crate::fault::Recovery;
use crate::fixtures::{self, LINKER, USER_ENTRY};
use crate::hal::regs::{
    DRAM0_PMS_MONITOR_2, DRAM0_PMS_MONITOR_3, MONITOR_STATUS_INTR_S, WCL_WORLD_TRIGGER_ADDR,
};
use crate::map::ObjType;
use crate::ota::UserSlot;
use crate::platform::{DeferredJob, EventBase, KObj, Memory, Platform, Rtos};
use crate::sim::SimPlatform;
use crate::syscall::{dispatch, Args};
use crate::trap::{
    ecall_dispatch, ecall_stack_top, handle_ecall, register_trap_env, violation_dispatch, ExcFrame,
    REG_A0, REG_SP,
};

/// Scratch area in user DRAM, clear of the image's data and startup stack.
const SCRATCH: usize = LINKER.w1_dram.start + 0x3000;
const KDRAM_BUF: usize = 0x3FC9_8000;

fn booted(config: Config) -> (PrivSep<SimPlatform>, KObj) {
    let ps = SimPlatform::context_with(config);
    ps.platform().install_user_image();
    let main = ps.user_boot().unwrap();
    ps.platform().set_current_task(main);
    (ps, main)
}

fn call(ps: &PrivSep<SimPlatform>, nr: Sysno, args: [usize; 6]) -> isize {
    dispatch(ps, nr.raw(), &Args::new(args))
}

fn queue_obj(ps: &PrivSep<SimPlatform>, handle: isize) -> KObj {
    ps.map().verify(handle as u32, ObjType::Queue).unwrap().ptr
}

#[test]
fn deleted_task_hands_its_stack_to_the_cleanup_queue_once() {
    let (ps, _) = booted(Config::DEFAULT);
    let cleanup = call(&ps, Sysno::QueueCreate, [20, 8, QUEUE_TYPE_CLEANUP as usize, 0, 0, 0]);
    assert!(cleanup > 0);

    let stack = LINKER.w1_dram.start + 0x5000;
    let errno = stack + 0x800;
    let out = SCRATCH + 0x100;
    let name = SCRATCH + 0x200;
    let ctx = TaskCtx { stack: stack as u32, stack_size: 0x800, errno: errno as u32, task_handle: out as u32 };
    ps.platform().write(SCRATCH, &ctx.encode());
    ps.platform().write(name, b"worker\0");
    ps.platform().write_u32(errno, 0xDEAD);

    let live = ps.platform().live_allocations();
    assert_eq!(call(&ps, Sysno::TaskCreate, [USER_ENTRY as usize, name, 0, 5, 0, SCRATCH]), 1);
    assert_eq!(ps.platform().read_u32(errno), 0);
    let handle = ps.platform().read_u32(out);
    let task = ps.map().verify(handle, ObjType::Task).unwrap().ptr;
    assert!(!ps.layout().is_valid_kdram_addr(handle as usize));
    assert_eq!(ps.platform().task_name(task).as_str(), "worker");
    assert_eq!(ps.tasks().len(), 2);
    assert_eq!(ps.platform().scheduler_suspended(), 0);

    assert_eq!(call(&ps, Sysno::TaskDelete, [handle as usize, 0, 0, 0, 0, 0]), 0);
    ps.cleanup_task(task);
    let items = ps.platform().queue_items(queue_obj(&ps, cleanup));
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], CleanupItem { ptr: stack as u32, len: 0x800 }.encode());
    assert_eq!(items[1], CleanupItem { ptr: errno as u32, len: 4 }.encode());
    // TCB and kernel stack are released.
    assert_eq!(ps.platform().live_allocations(), live);

    assert_eq!(call(&ps, Sysno::TaskDelete, [handle as usize, 0, 0, 0, 0, 0]), -1);
}

#[test]
fn task_create_rolls_back_when_the_kernel_heap_runs_dry() {
    let (ps, _) = booted(Config::DEFAULT);
    let stack = LINKER.w1_dram.start + 0x5000;
    let ctx = TaskCtx { stack: stack as u32, stack_size: 0x400, errno: (stack + 0x400) as u32, task_handle: 0 };
    ps.platform().write(SCRATCH, &ctx.encode());

    let live = ps.platform().live_allocations();
    let handles = ps.map().live().len();
    ps.platform().fail_kalloc_after(1);
    assert_eq!(call(&ps, Sysno::TaskCreate, [USER_ENTRY as usize, 0, 0, 5, 0, SCRATCH]), -1);
    assert_eq!(ps.platform().live_allocations(), live);
    assert_eq!(ps.map().live().len(), handles);
    assert_eq!(ps.tasks().len(), 1);
}

#[test]
fn task_create_rejects_a_stack_outside_user_dram() {
    let (ps, _) = booted(Config::DEFAULT);
    let ctx = TaskCtx { stack: KDRAM_BUF as u32, stack_size: 0x400, errno: SCRATCH as u32 + 0x80, task_handle: 0 };
    ps.platform().write(SCRATCH, &ctx.encode());
    assert_eq!(call(&ps, Sysno::TaskCreate, [USER_ENTRY as usize, 0, 0, 5, 0, SCRATCH]), 0);
    assert_eq!(ps.tasks().len(), 1);
}

#[test]
fn forged_and_stale_handles_are_refused() {
    let (ps, _) = booted(Config::DEFAULT);
    let queue = call(&ps, Sysno::QueueCreate, [4, 8, 0, 0, 0, 0]);
    let group = call(&ps, Sysno::EventGroupCreate, [0; 6]);
    assert!(queue > 0 && group > 0);

    // A raw kernel address is never a handle.
    let obj = queue_obj(&ps, queue);
    assert_eq!(call(&ps, Sysno::QueueMessagesWaiting, [obj, 0, 0, 0, 0, 0]), 0);
    // Right slot, wrong type.
    assert_eq!(call(&ps, Sysno::QueueDelete, [group as usize, 0, 0, 0, 0, 0]), -1);
    assert!(ps.platform().group_exists(ps.map().get(group as u32).unwrap().ptr));

    assert_eq!(call(&ps, Sysno::QueueDelete, [queue as usize, 0, 0, 0, 0, 0]), 0);
    assert!(!ps.platform().queue_exists(obj));
    let again = call(&ps, Sysno::QueueCreate, [4, 8, 0, 0, 0, 0]);
    assert_ne!(again, queue);
    assert_eq!(call(&ps, Sysno::QueueDelete, [queue as usize, 0, 0, 0, 0, 0]), -1);
}

#[test]
fn queue_round_trip_and_kernel_buffer_receive() {
    let (ps, _) = booted(Config::DEFAULT);
    let queue = call(&ps, Sysno::QueueCreate, [4, 8, 0, 0, 0, 0]);
    ps.platform().write(SCRATCH, b"payload!");
    assert_eq!(call(&ps, Sysno::QueueSend, [queue as usize, SCRATCH, 0, 0, 0, 0]), 1);
    assert_eq!(call(&ps, Sysno::QueueMessagesWaiting, [queue as usize, 0, 0, 0, 0, 0]), 1);

    ps.platform().write(KDRAM_BUF, &[0x5A; 8]);
    assert_eq!(call(&ps, Sysno::QueueReceive, [queue as usize, KDRAM_BUF, 0, 0, 0, 0]), 0);
    let mut kbuf = [0u8; 8];
    ps.platform().read(KDRAM_BUF, &mut kbuf);
    assert_eq!(kbuf, [0x5A; 8]);
    assert_eq!(call(&ps, Sysno::QueueMessagesWaiting, [queue as usize, 0, 0, 0, 0, 0]), 1);

    let dst = SCRATCH + 0x40;
    assert_eq!(call(&ps, Sysno::QueueReceive, [queue as usize, dst, 0, 0, 0, 0]), 1);
    let mut got = [0u8; 8];
    ps.platform().read(dst, &mut got);
    assert_eq!(&got, b"payload!");
}

#[test]
fn system_queues_are_singletons_and_cannot_be_deleted() {
    let (ps, _) = booted(Config::DEFAULT);
    let dispatch_q = call(&ps, Sysno::QueueCreate, [20, 0, QUEUE_TYPE_DISPATCH as usize, 0, 0, 0]);
    let cleanup_q = call(&ps, Sysno::QueueCreate, [20, 0, QUEUE_TYPE_CLEANUP as usize, 0, 0, 0]);
    assert_eq!(call(&ps, Sysno::QueueCreate, [5, 1, QUEUE_TYPE_DISPATCH as usize, 0, 0, 0]), dispatch_q);
    assert_eq!(ps.system_queues(), (dispatch_q as u32, cleanup_q as u32));
    assert_eq!(ps.platform().queue_item_size(queue_obj(&ps, dispatch_q)), DispatchMsg::WIRE_SIZE);

    assert_eq!(call(&ps, Sysno::QueueDelete, [dispatch_q as usize, 0, 0, 0, 0, 0]), -1);
    assert_eq!(call(&ps, Sysno::QueueDelete, [cleanup_q as usize, 0, 0, 0, 0, 0]), -1);
    assert!(ps.platform().queue_exists(queue_obj(&ps, dispatch_q)));
}

#[test]
fn events_reach_the_dispatcher_without_kernel_pointers() {
    let (ps, _) = booted(Config::DEFAULT);
    let dispatch_q = call(&ps, Sysno::QueueCreate, [20, 0, QUEUE_TYPE_DISPATCH as usize, 0, 0, 0]);
    let base = SCRATCH + 0x400;
    let out = SCRATCH + 0x420;
    let handler = USER_ENTRY as usize + 0x40;
    ps.platform().write(base, b"WIFI_EVENT\0");
    assert_eq!(call(&ps, Sysno::EventHandlerRegister, [base, 3, handler, 9, out, 0]), 0);

    let cookies = ps.platform().event_cookies(EventBase::Wifi, 3);
    assert_eq!(cookies.len(), 1);
    assert!(ps.on_event(cookies[0], EventBase::Wifi, 3, KDRAM_BUF));
    assert!(ps.on_event(cookies[0], EventBase::Wifi, 3, SCRATCH));

    let items = ps.platform().queue_items(queue_obj(&ps, dispatch_q));
    let expect = |data: u32| DispatchMsg::Event {
        handler: handler as u32,
        arg: 9,
        base: base as u32,
        id: 3,
        data,
    };
    assert_eq!(DispatchMsg::decode(&items[0]), Some(expect(0)));
    assert_eq!(DispatchMsg::decode(&items[1]), Some(expect(SCRATCH as u32)));

    let handle = ps.platform().read_u32(out) as usize;
    assert_eq!(call(&ps, Sysno::EventHandlerUnregister, [base, 3, handle, 0, 0, 0]), 0);
    assert!(ps.platform().event_cookies(EventBase::Wifi, 3).is_empty());
}

#[test]
fn ecall_runs_on_the_kernel_stack_and_returns_to_the_user_stack() {
    let (ps, main) = booted(Config::DEFAULT);
    let kstack = ps.tasks().get(main).unwrap().kernel_stack.unwrap();
    let mut frame = ExcFrame::default();
    frame.set_mepc(USER_ENTRY + 0x10);
    frame.regs[REG_SP] = (SCRATCH + 0x800) as u32;
    frame.regs[REG_A0] = 4;
    frame.regs[REG_A0 + 1] = 8;
    frame.regs[REG_A0 + 7] = Sysno::QueueCreate.raw();
    assert_eq!(ps.kernel_stack_top(main), Some(kstack.top()));

    handle_ecall(&ps, &mut frame);
    let handle = frame.regs[REG_A0];
    assert!(ps.map().verify(handle, ObjType::Queue).is_some());
    assert_eq!(frame.mepc(), USER_ENTRY + 0x14);
    assert_eq!(frame.sp(), (SCRATCH + 0x800) as u32);
    assert_eq!(ps.tasks().get(main).unwrap().saved_user_sp, None);
}

#[test]
fn ecall_from_a_protected_task_is_refused() {
    let (ps, _) = booted(Config::DEFAULT);
    ps.platform().set_current_task(ps.platform().main_task());
    let mut frame = ExcFrame::default();
    frame.regs[REG_A0 + 7] = Sysno::QueueCreate.raw();
    frame.regs[REG_A0] = 4;
    handle_ecall(&ps, &mut frame);
    assert_eq!(frame.regs[REG_A0], u32::MAX);
    assert_eq!(frame.mepc(), 4);
}

#[test]
fn dram_violation_restarts_the_user_world_once() {
    let (ps, main) = booted(Config::DEFAULT);
    let bank = ps.platform().regs();
    bank.poke(DRAM0_PMS_MONITOR_2, 1 << MONITOR_STATUS_INTR_S);
    bank.poke(DRAM0_PMS_MONITOR_3, 0x3FC9_1234);

    let mut frame = ExcFrame::default();
    frame.mcause = 7;
    let mut out = String::new();
    assert_eq!(ps.on_violation_as(Policy::RestartUser, &mut frame, &mut out), Recovery::RestartUser);
    assert!(out.contains("Guru Meditation Error: Illegal DRAM access: Fault addr: 0x3fc91234"));
    assert!(out.contains("Troubling task: User main task"));
    assert!(out.contains("Preparing to restart user_app..."));
    assert_eq!(ps.platform().suspended(), [main]);
    assert_eq!(ps.platform().oneshots(), [DeferredJob::RestartUser]);
    assert!(ps.platform().deleted().is_empty());
    assert_eq!(ps.platform().restarts(), 0);

    ps.run_deferred(DeferredJob::RestartUser).unwrap();
    assert_eq!(ps.platform().deleted(), [main]);
    assert_eq!(ps.tasks().user_tasks().len(), 1);
    assert!(ps.user_app_running());
}

#[test]
fn delete_policy_removes_only_the_faulting_task() {
    let (ps, main) = booted(Config::DEFAULT);
    let mut frame = ExcFrame::default();
    frame.mcause = 2;
    let mut out = String::new();
    assert_eq!(
        ps.handle_crashed_task_as(Policy::DeleteTask, &mut frame, &mut out),
        Recovery::DeleteTask(main)
    );
    assert!(out.contains("Illegal instruction"));
    assert!(out.contains("Deleting User main task..."));
    assert_eq!(ps.platform().deleted(), [main]);
    assert!(ps.platform().oneshots().is_empty());

    // The platform reports the deletion once the scheduler lets go of the task.
    ps.cleanup_task(main);
    assert!(ps.tasks().is_empty());
}

#[test]
fn clearing_user_resources_releases_every_handle() {
    let (ps, _) = booted(Config::DEFAULT);
    call(&ps, Sysno::QueueCreate, [4, 8, 0, 0, 0, 0]);
    call(&ps, Sysno::EventGroupCreate, [0; 6]);
    call(&ps, Sysno::NetifCreateDefaultSta, [0; 6]);
    assert!(ps.map().live().len() >= 4);

    ps.teardown();
    assert!(ps.map().live().is_empty());
    assert!(ps.tasks().is_empty());
    assert!(!ps.user_app_running());
    assert_eq!(ps.system_queues(), (0, 0));
}

#[test]
fn boot_follows_the_selected_ota_slot() {
    let ps = SimPlatform::context();
    ps.platform().install_user_image();
    ps.platform().flash_image(fixtures::USER_1.offset, &fixtures::user_image());
    ps.ota().set_boot_partition(ps.platform(), UserSlot::User1).unwrap();

    ps.user_boot().unwrap();
    let mappings = ps.platform().flash_mappings();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].paddr, fixtures::USER_1.offset);
    assert_eq!(ps.ota().get_next_update_partition(ps.platform()).unwrap().0, UserSlot::User0);
}

#[test]
fn oversized_and_unmapped_lengths_fail_without_touching_memory() {
    let (ps, _) = booted(Config::DEFAULT);
    let sock = call(&ps, Sysno::Socket, [2, 1, 0, 0, 0, 0]);
    assert!(sock >= 0);
    let sock = sock as usize;
    let past_end = LINKER.w1_dram.end - 8;

    // A length no heap could satisfy is refused before any allocation.
    assert_eq!(call(&ps, Sysno::UartWrite, [0, SCRATCH, usize::MAX, 0, 0, 0]), -1);
    assert_eq!(call(&ps, Sysno::Send, [sock, SCRATCH, isize::MAX as usize + 1, 0, 0, 0]), -1);
    assert_eq!(call(&ps, Sysno::Recv, [sock, SCRATCH, usize::MAX, 0, 0, 0]), -1);
    assert_eq!(call(&ps, Sysno::UartRead, [0, SCRATCH, usize::MAX, 0, 0, 0]), -1);

    // Ranges that start in user DRAM but run off its end.
    assert_eq!(call(&ps, Sysno::UartWrite, [0, past_end, 64, 0, 0, 0]), -1);
    assert_eq!(call(&ps, Sysno::UartRead, [0, past_end, 64, 0, 0, 0]), -1);
    assert_eq!(call(&ps, Sysno::Recv, [sock, past_end, 64, 0, 0, 0]), -1);

    // Protected DRAM is never a source or a destination.
    ps.platform().push_uart_input(b"secret");
    assert_eq!(call(&ps, Sysno::UartRead, [0, KDRAM_BUF, 6, 0, 0, 0]), -1);
    assert_eq!(call(&ps, Sysno::UartWrite, [0, KDRAM_BUF, 6, 0, 0, 0]), -1);
    assert!(ps.platform().uart_output().is_empty());

    ps.platform().write(SCRATCH, b"ok");
    assert_eq!(call(&ps, Sysno::UartWrite, [0, SCRATCH, 2, 0, 0, 0]), 2);
    assert_eq!(ps.platform().uart_output(), b"ok");
}

#[test]
fn queue_send_with_an_item_past_user_dram_is_refused() {
    let (ps, _) = booted(Config::DEFAULT);
    let queue = call(&ps, Sysno::QueueCreate, [2, 64, 0, 0, 0, 0]);
    assert!(queue > 0);
    let tail = LINKER.w1_dram.end - 16;
    assert_eq!(call(&ps, Sysno::QueueSend, [queue as usize, tail, 0, 0, 0, 0]), 0);
    assert_eq!(call(&ps, Sysno::QueueSend, [queue as usize, KDRAM_BUF, 0, 0, 0, 0]), 0);
    assert!(ps.platform().queue_items(queue_obj(&ps, queue)).is_empty());
}

#[test]
fn ecall_trap_arms_the_return_to_the_user_world() {
    let (ps, _) = booted(Config::DEFAULT);
    let mut frame = ExcFrame::default();
    frame.set_mepc(USER_ENTRY + 0x20);
    frame.regs[REG_A0 + 7] = Sysno::EventGroupCreate.raw();
    ps.ecall_trap(&mut frame);
    assert_eq!(ps.platform().regs().peek(WCL_WORLD_TRIGGER_ADDR), USER_ENTRY + 0x24);

    // A protected caller stays in WORLD0.
    ps.platform().set_current_task(ps.platform().main_task());
    let mut frame = ExcFrame::default();
    frame.set_mepc(0x4200_0100);
    ps.ecall_trap(&mut frame);
    assert_eq!(frame.regs[REG_A0], u32::MAX);
    assert_eq!(ps.platform().regs().peek(WCL_WORLD_TRIGGER_ADDR), USER_ENTRY + 0x24);
}

// The only test that touches the process-wide trap environment.
#[test]
fn trap_hooks_reach_the_registered_context() {
    let mut frame = ExcFrame::default();
    frame.set_mepc(USER_ENTRY);
    assert_eq!(ecall_stack_top(), 0);
    ecall_dispatch(&mut frame);
    assert_eq!((frame.regs[REG_A0], frame.mepc()), (u32::MAX, USER_ENTRY + 4));

    let (ps, main) = booted(Config::DEFAULT);
    let ps: &'static PrivSep<SimPlatform> = alloc::boxed::Box::leak(alloc::boxed::Box::new(ps));
    // SAFETY: host tests drive the context from this thread only.
    unsafe { register_trap_env(ps) };
    ps.platform().set_current_task(main);
    assert_eq!(Some(ecall_stack_top()), ps.kernel_stack_top(main));

    let mut frame = ExcFrame::default();
    frame.set_mepc(USER_ENTRY);
    frame.regs[REG_A0] = 2;
    frame.regs[REG_A0 + 1] = 4;
    frame.regs[REG_A0 + 7] = Sysno::QueueCreate.raw();
    ecall_dispatch(&mut frame);
    assert!(ps.map().verify(frame.regs[REG_A0], ObjType::Queue).is_some());
    assert_eq!(ps.platform().regs().peek(WCL_WORLD_TRIGGER_ADDR), USER_ENTRY + 4);

    let mut frame = ExcFrame::default();
    frame.mcause = 7;
    violation_dispatch(&mut frame);
    match Policy::CONFIGURED {
        Policy::DeleteTask => assert_eq!(ps.platform().deleted(), [main]),
        Policy::RestartUser => assert_eq!(ps.platform().oneshots(), [DeferredJob::RestartUser]),
        Policy::Reboot => assert_eq!(ps.platform().restarts(), 1),
    }
}
