// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Privilege-separation context owning all gateway state
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Scenario tests in `tests.rs` over the simulated platform
//! PUBLIC API: PrivSep{new,init,teardown,clear_user_resources,cleanup_task,on_*}, AppHandler
//! DEPENDS_ON: map::HandleMap, task::TaskTable, callback::Callback, platform::Platform
//! INVARIANTS: Interrupt-context entry points never touch the handle map or take a lock;
//!             system queues are published only after their handle exists
//! ADR: docs/adr/0001-world-separation.md

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use privsep_abi::{CleanupItem, DispatchMsg, Layout, UserAppDesc, PORT_MAX_DELAY};

use crate::callback::Callback;
use crate::config::Config;
use crate::cpu::IsrGuard;
use crate::trap::ExcFrame;
use crate::map::{HandleMap, ObjType};
use crate::ota::OtaSelector;
use crate::platform::{EventBase, KObj, Platform};
use crate::sync::IrqMutex;
use crate::task::TaskTable;

/// Application hook run on every violation before recovery.
pub type AppHandler = fn(&ExcFrame);

/// Error constructing the context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextError {
    /// The handle table could not be allocated.
    NoMem,
}

/// One of the two user-world system queues.
pub(crate) struct SystemQueue {
    handle: AtomicU32,
    obj: AtomicUsize,
}

impl SystemQueue {
    const fn new() -> Self {
        Self { handle: AtomicU32::new(0), obj: AtomicUsize::new(0) }
    }

    pub(crate) fn handle(&self) -> u32 {
        self.handle.load(Ordering::Acquire)
    }

    pub(crate) fn obj(&self) -> Option<KObj> {
        match self.obj.load(Ordering::Acquire) {
            0 => None,
            obj => Some(obj),
        }
    }

    pub(crate) fn publish(&self, handle: u32, obj: KObj) {
        self.obj.store(obj, Ordering::Release);
        self.handle.store(handle, Ordering::Release);
    }

    fn reset(&self) {
        self.handle.store(0, Ordering::Release);
        self.obj.store(0, Ordering::Release);
    }
}

/// Task-watchdog state carried from the watchdog interrupt into the next fault.
pub(crate) struct WdtLatch {
    pub(crate) pending: AtomicBool,
    pub(crate) user_epc: AtomicU32,
}

/// Privilege-separation context: one per protected firmware.
pub struct PrivSep<P: Platform> {
    pub(crate) platform: P,
    pub(crate) layout: Layout,
    pub(crate) config: Config,
    pub(crate) map: HandleMap,
    pub(crate) tasks: TaskTable,
    pub(crate) dispatch_queue: SystemQueue,
    pub(crate) cleanup_queue: SystemQueue,
    pub(crate) wdt: WdtLatch,
    pub(crate) app_handler: Option<AppHandler>,
    pub(crate) app_desc: IrqMutex<Option<UserAppDesc>>,
    pub(crate) user_app_running: AtomicBool,
    pub(crate) ota: OtaSelector,
}

impl<P: Platform> PrivSep<P> {
    pub fn new(platform: P, layout: Layout, config: Config) -> Result<Self, ContextError> {
        let map = HandleMap::new(layout, config.map_capacity, config.handle_crc)
            .ok_or(ContextError::NoMem)?;
        let ota = OtaSelector::new(platform.partitions(), config.ota_rollback);
        Ok(Self {
            platform,
            layout,
            config,
            map,
            tasks: TaskTable::new(),
            dispatch_queue: SystemQueue::new(),
            cleanup_queue: SystemQueue::new(),
            wdt: WdtLatch { pending: AtomicBool::new(false), user_epc: AtomicU32::new(0) },
            app_handler: None,
            app_desc: IrqMutex::new(None),
            user_app_running: AtomicBool::new(false),
            ota,
        })
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn map(&self) -> &HandleMap {
        &self.map
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    pub fn ota(&self) -> &OtaSelector {
        &self.ota
    }

    pub fn user_app_running(&self) -> bool {
        self.user_app_running.load(Ordering::Acquire)
    }

    /// Handles of the dispatch and cleanup queues (0 when not created).
    pub fn system_queues(&self) -> (u32, u32) {
        (self.dispatch_queue.handle(), self.cleanup_queue.handle())
    }

    /// Releases every user-world resource; protected state stays configured.
    pub fn teardown(&self) {
        self.clear_user_resources();
    }

    /// Walks the handle map and destroys every object the user world owns.
    pub fn clear_user_resources(&self) {
        self.dispatch_queue.reset();
        self.cleanup_queue.reset();
        crate::log_info!(target: "privsep", "Deleting user_app resources");

        let p = &self.platform;
        for (handle, entry) in self.map.live() {
            let raw = handle.raw();
            match entry.ty {
                ObjType::Queue => {
                    p.queue_delete(entry.ptr);
                    self.map.remove(raw);
                }
                ObjType::Task => {
                    p.task_delete(entry.ptr);
                    self.cleanup_task(entry.ptr);
                    self.map.remove(raw);
                }
                ObjType::EspTimer => {
                    let cookie = p.esp_timer_cookie(entry.ptr);
                    let _ = p.esp_timer_stop(entry.ptr);
                    if p.esp_timer_delete(entry.ptr).is_ok() {
                        Callback::release(p, cookie);
                    }
                    self.map.remove(raw);
                }
                ObjType::XTimer => {
                    let cookie = p.xtimer_cookie(entry.ptr);
                    if p.xtimer_command(entry.ptr, privsep_abi::TimerCmd::Delete, 0, 0) {
                        Callback::release(p, cookie);
                    }
                    self.map.remove(raw);
                }
                ObjType::EventGroup => {
                    p.event_group_delete(entry.ptr);
                    self.map.remove(raw);
                }
                ObjType::Netif => {
                    p.netif_destroy(entry.ptr);
                    self.map.remove(raw);
                }
                ObjType::Gpio => {
                    if let Some(Callback::Gpio { gpio, .. }) = Callback::load(p, entry.ptr) {
                        let _ = p.gpio_isr_remove(gpio);
                    }
                    Callback::release(p, entry.ptr);
                    self.map.remove(raw);
                }
                ObjType::EventHandler => {
                    if let Some(Callback::Event { user_base, id, instance, .. }) = Callback::load(p, entry.ptr) {
                        let base = crate::syscall::event::event_base(self, user_base as usize);
                        let _ = p.event_handler_unregister(base, id, instance as KObj);
                    }
                    Callback::release(p, entry.ptr);
                    self.map.remove(raw);
                }
            }
        }
        self.user_app_running.store(false, Ordering::Release);
    }

    /// Releases the gateway state of a deleted task.
    ///
    /// Protected tasks and already-cleaned tasks are ignored. The user stack and
    /// errno cell go to the cleanup queue because only the user heap can free them.
    pub fn cleanup_task(&self, task: KObj) {
        let Some(ctx) = self.tasks.remove(task) else {
            return;
        };
        let Some(kstack) = ctx.kernel_stack else {
            return;
        };
        self.map.remove(ctx.self_handle);
        self.platform.kfree(kstack.base);

        let Some(queue) = self.cleanup_queue.obj() else {
            return;
        };
        let items = [
            CleanupItem { ptr: ctx.user_stack as u32, len: ctx.user_stack_size as u32 },
            CleanupItem { ptr: ctx.errno as u32, len: 4 },
        ];
        for item in items {
            if !self.platform.queue_send(queue, &item.encode(), 0, crate::platform::SendPos::Back) {
                crate::log_warn!(target: "privsep", "cleanup queue full, leaking {:#x}", item.ptr);
            }
        }
    }

    // ------------------------------------------------------ trusted callbacks

    fn dispatch(&self, msg: DispatchMsg) -> bool {
        match self.dispatch_queue.obj() {
            Some(queue) => {
                self.platform.queue_send(queue, &msg.encode(), PORT_MAX_DELAY, crate::platform::SendPos::Back)
            }
            None => false,
        }
    }

    /// Software-timer expiry (timer service task).
    pub fn on_xtimer_expired(&self, timer: KObj) -> bool {
        let cookie = self.platform.xtimer_cookie(timer);
        match Callback::load(&self.platform, cookie) {
            Some(Callback::XTimer { callback, timer, .. }) => {
                self.dispatch(DispatchMsg::XTimer { callback, timer })
            }
            _ => false,
        }
    }

    /// High-resolution timer expiry (esp_timer task).
    pub fn on_esp_timer_expired(&self, cookie: usize) -> bool {
        match Callback::load(&self.platform, cookie) {
            Some(Callback::EspTimer { callback, arg }) => {
                self.dispatch(DispatchMsg::EspTimer { callback, arg })
            }
            _ => false,
        }
    }

    /// GPIO interrupt. Runs in interrupt context.
    pub fn on_gpio_isr(&self, cookie: usize) -> bool {
        let _isr = IsrGuard::enter();
        let Some(queue) = self.dispatch_queue.obj() else {
            return false;
        };
        match Callback::load(&self.platform, cookie) {
            Some(Callback::Gpio { isr, arg, .. }) => self
                .platform
                .queue_send_from_isr(queue, &DispatchMsg::Gpio { isr, arg }.encode()),
            _ => false,
        }
    }

    /// Event-loop delivery (event task). `data` is forwarded only if it lies in user memory.
    pub fn on_event(&self, cookie: usize, _base: EventBase, id: i32, data: usize) -> bool {
        match Callback::load(&self.platform, cookie) {
            Some(Callback::Event { handler, arg, user_base, .. }) => {
                let data = if self.layout.is_valid_user_d_addr(data) { data as u32 } else { 0 };
                self.dispatch(DispatchMsg::Event { handler, arg, base: user_base, id, data })
            }
            _ => {
                crate::log_error!(target: "privsep", "Error sending message on queue");
                false
            }
        }
    }
}
