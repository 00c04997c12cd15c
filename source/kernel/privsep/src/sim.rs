// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Host-side simulated protected firmware.
//!
//! Memory is a sparse page store covering the whole address space. The kernel heap is
//! a bump allocator in protected DRAM that never reuses an address, so a freed object
//! stays readable (and distinguishable) for the rest of a test.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use privsep_abi::{HeapStats, TimerCmd};
use spin::Mutex;

use crate::config::Config;
use crate::context::PrivSep;
use crate::hal::mock::RegisterBank;
use crate::image::FlashMapping;
use crate::ota::PartitionTable;
use crate::platform::{
    DeferredJob, EventBase, Flash, FlashError, KObj, Memory, Platform, Rtos, RtosError, SendPos,
    TaskName, TaskSpec, SECTOR_SIZE,
};
use crate::task::TCB_SIZE;

const PAGE: usize = 4096;
const HEAP_BASE: usize = 0x3FC9_0000;
const HEAP_END: usize = 0x3FCC_0000;
const HEAP_ALIGN: usize = 16;
const FLASH_SIZE: usize = 0x20_0000;
/// Size of the RTOS bookkeeping object allocated for queues, timers and groups.
const OBJ_SIZE: usize = 64;

struct SimQueue {
    depth: usize,
    item_size: usize,
    items: VecDeque<Vec<u8>>,
}

struct SimTask {
    name: TaskName,
    priority: u32,
    owns_tcb: bool,
}

struct XTimer {
    cookie: usize,
    active: bool,
}

struct EspTimer {
    cookie: usize,
    armed: bool,
}

struct Handler {
    base: EventBase,
    id: i32,
    cookie: usize,
}

#[derive(Default)]
struct State {
    pages: BTreeMap<usize, Box<[u8; PAGE]>>,
    next: usize,
    live: BTreeMap<usize, usize>,
    kalloc_budget: Option<usize>,
    flash: Vec<u8>,
    mappings: Vec<FlashMapping>,
    queues: BTreeMap<KObj, SimQueue>,
    tasks: BTreeMap<KObj, SimTask>,
    current: KObj,
    fail_task_create: bool,
    suspended: Vec<KObj>,
    resumed: Vec<KObj>,
    deleted: Vec<KObj>,
    scheduler_suspended: u32,
    xtimers: BTreeMap<KObj, XTimer>,
    esp_timers: BTreeMap<KObj, EspTimer>,
    groups: BTreeMap<KObj, u32>,
    handlers: BTreeMap<KObj, Handler>,
    gpio: BTreeMap<u32, usize>,
    uart_out: Vec<u8>,
    uart_in: VecDeque<u8>,
    next_socket: i32,
    sockets: Vec<i32>,
    oneshots: Vec<DeferredJob>,
    restarts: usize,
    aborts: Vec<String>,
}

impl State {
    fn alloc(&mut self, size: usize) -> Option<usize> {
        if let Some(budget) = self.kalloc_budget.as_mut() {
            if *budget == 0 {
                return None;
            }
            *budget -= 1;
        }
        let addr = self.next;
        let end = addr.checked_add(size.max(1))?;
        if end > HEAP_END {
            return None;
        }
        self.next = (end + HEAP_ALIGN - 1) & !(HEAP_ALIGN - 1);
        self.live.insert(addr, size);
        Some(addr)
    }

    fn free(&mut self, addr: usize) {
        self.live.remove(&addr);
    }

    fn page(&mut self, addr: usize) -> &mut [u8; PAGE] {
        self.pages.entry(addr & !(PAGE - 1)).or_insert_with(|| Box::new([0; PAGE]))
    }

    fn read(&mut self, addr: usize, out: &mut [u8]) {
        for (i, byte) in out.iter_mut().enumerate() {
            let at = addr + i;
            *byte = self.page(at)[at % PAGE];
        }
    }

    fn write(&mut self, addr: usize, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            let at = addr + i;
            self.page(at)[at % PAGE] = *byte;
        }
    }
}

/// Simulated protected firmware backing the unit and scenario tests.
pub struct SimPlatform {
    regs: RegisterBank,
    state: Mutex<State>,
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimPlatform {
    pub const VECTOR_BASE: u32 = 0x4038_0000;
    pub const ELF_SHA256: [u8; 32] = [0xAB; 32];

    /// A platform with blank flash and one running protected task, `main`.
    pub fn new() -> Self {
        let mut state = State {
            next: HEAP_BASE,
            flash: vec![0xFF; FLASH_SIZE],
            next_socket: 54,
            ..State::default()
        };
        let main = state.alloc(TCB_SIZE).unwrap_or(HEAP_BASE);
        state.tasks.insert(main, SimTask { name: TaskName::new("main"), priority: 1, owns_tcb: false });
        state.current = main;
        Self { regs: RegisterBank::new(), state: Mutex::new(state) }
    }

    /// A privilege-separation context over a fresh platform with the default config.
    pub fn context() -> PrivSep<SimPlatform> {
        Self::context_with(Config::DEFAULT)
    }

    pub fn context_with(config: Config) -> PrivSep<SimPlatform> {
        PrivSep::new(SimPlatform::new(), crate::fixtures::layout(), config)
            .expect("sim context")
    }

    // ------------------------------------------------------------- flash

    /// Copies raw bytes into flash, bypassing erase semantics.
    pub fn flash_image(&self, offset: u32, data: &[u8]) {
        let start = offset as usize;
        self.state.lock().flash[start..start + data.len()].copy_from_slice(data);
    }

    /// Writes the fixture user image into the first user slot.
    pub fn install_user_image(&self) {
        self.flash_image(crate::fixtures::USER_0.offset, &crate::fixtures::user_image());
    }

    pub fn flash_mappings(&self) -> Vec<FlashMapping> {
        self.state.lock().mappings.clone()
    }

    // -------------------------------------------------------------- heap

    /// Kernel allocations not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Lets the next `n` kernel allocations succeed and fails every later one.
    pub fn fail_kalloc_after(&self, n: usize) {
        self.state.lock().kalloc_budget = Some(n);
    }

    // --------------------------------------------------------- scheduler

    pub fn main_task(&self) -> KObj {
        self.state.lock().tasks.keys().next().copied().unwrap_or(HEAP_BASE)
    }

    pub fn set_current_task(&self, task: KObj) {
        self.state.lock().current = task;
    }

    pub fn fail_task_create(&self, fail: bool) {
        self.state.lock().fail_task_create = fail;
    }

    pub fn task_exists(&self, task: KObj) -> bool {
        self.state.lock().tasks.contains_key(&task)
    }

    pub fn task_priority(&self, task: KObj) -> Option<u32> {
        self.state.lock().tasks.get(&task).map(|t| t.priority)
    }

    pub fn suspended(&self) -> Vec<KObj> {
        self.state.lock().suspended.clone()
    }

    pub fn resumed(&self) -> Vec<KObj> {
        self.state.lock().resumed.clone()
    }

    pub fn deleted(&self) -> Vec<KObj> {
        self.state.lock().deleted.clone()
    }

    /// Nesting depth of `suspend_all`; zero when balanced.
    pub fn scheduler_suspended(&self) -> u32 {
        self.state.lock().scheduler_suspended
    }

    // ----------------------------------------------------------- objects

    pub fn queue_exists(&self, queue: KObj) -> bool {
        self.state.lock().queues.contains_key(&queue)
    }

    /// Items currently held by `queue`, front first.
    pub fn queue_items(&self, queue: KObj) -> Vec<Vec<u8>> {
        self.state.lock().queues.get(&queue).map_or_else(Vec::new, |q| q.items.iter().cloned().collect())
    }

    pub fn xtimer_active(&self, timer: KObj) -> Option<bool> {
        self.state.lock().xtimers.get(&timer).map(|t| t.active)
    }

    pub fn esp_timer_exists(&self, timer: KObj) -> bool {
        self.state.lock().esp_timers.contains_key(&timer)
    }

    pub fn group_exists(&self, group: KObj) -> bool {
        self.state.lock().groups.contains_key(&group)
    }

    /// Cookie registered for `gpio`, if any.
    pub fn gpio_cookie(&self, gpio: u32) -> Option<usize> {
        self.state.lock().gpio.get(&gpio).copied()
    }

    /// Cookies of every handler registered for `(base, id)`.
    pub fn event_cookies(&self, base: EventBase, id: i32) -> Vec<usize> {
        self.state
            .lock()
            .handlers
            .values()
            .filter(|h| h.base == base && h.id == id)
            .map(|h| h.cookie)
            .collect()
    }

    pub fn uart_output(&self) -> Vec<u8> {
        self.state.lock().uart_out.clone()
    }

    pub fn push_uart_input(&self, data: &[u8]) {
        self.state.lock().uart_in.extend(data.iter().copied());
    }

    // ------------------------------------------------------------ system

    pub fn oneshots(&self) -> Vec<DeferredJob> {
        self.state.lock().oneshots.clone()
    }

    pub fn restarts(&self) -> usize {
        self.state.lock().restarts
    }

    pub fn aborts(&self) -> Vec<String> {
        self.state.lock().aborts.clone()
    }

    fn alloc_obj(&self) -> Option<KObj> {
        self.state.lock().alloc(OBJ_SIZE)
    }
}

impl Rtos for SimPlatform {
    fn kalloc(&self, size: usize) -> Option<usize> {
        self.state.lock().alloc(size)
    }

    fn kfree(&self, addr: usize) {
        self.state.lock().free(addr);
    }

    fn heap_stats(&self) -> HeapStats {
        let st = self.state.lock();
        let free = (HEAP_END - st.next) as u32;
        HeapStats { free, largest_free_block: free, min_free: free }
    }

    fn suspend_all(&self) {
        self.state.lock().scheduler_suspended += 1;
    }

    fn resume_all(&self) {
        let mut st = self.state.lock();
        st.scheduler_suspended = st.scheduler_suspended.saturating_sub(1);
    }

    fn current_task(&self) -> KObj {
        self.state.lock().current
    }

    fn task_name(&self, task: KObj) -> TaskName {
        self.state.lock().tasks.get(&task).map_or(TaskName::EMPTY, |t| t.name)
    }

    fn task_create_static(&self, spec: &TaskSpec, tcb: KObj) -> Result<(), RtosError> {
        let mut st = self.state.lock();
        if st.fail_task_create {
            return Err(RtosError::Fail);
        }
        st.tasks.insert(tcb, SimTask { name: spec.name, priority: spec.priority, owns_tcb: true });
        Ok(())
    }

    fn task_delete(&self, task: KObj) {
        let mut st = self.state.lock();
        if let Some(t) = st.tasks.remove(&task) {
            if t.owns_tcb {
                st.free(task);
            }
        }
        st.deleted.push(task);
    }

    fn task_suspend(&self, task: KObj) {
        self.state.lock().suspended.push(task);
    }

    fn task_resume(&self, task: KObj) {
        self.state.lock().resumed.push(task);
    }

    fn task_delay(&self, _ticks: u32) {}

    fn task_list(&self) -> Vec<KObj> {
        self.state.lock().tasks.keys().copied().collect()
    }

    fn queue_create(&self, len: usize, item_size: usize) -> Option<KObj> {
        let obj = self.alloc_obj()?;
        self.state
            .lock()
            .queues
            .insert(obj, SimQueue { depth: len, item_size, items: VecDeque::new() });
        Some(obj)
    }

    fn queue_item_size(&self, queue: KObj) -> usize {
        self.state.lock().queues.get(&queue).map_or(0, |q| q.item_size)
    }

    fn queue_send(&self, queue: KObj, item: &[u8], _ticks: u32, pos: SendPos) -> bool {
        let mut st = self.state.lock();
        let Some(q) = st.queues.get_mut(&queue) else {
            return false;
        };
        let mut item = item.to_vec();
        item.resize(q.item_size, 0);
        match pos {
            SendPos::Overwrite => {
                q.items.clear();
                q.items.push_back(item);
            }
            _ if q.items.len() >= q.depth => return false,
            SendPos::Back => q.items.push_back(item),
            SendPos::Front => q.items.push_front(item),
        }
        true
    }

    fn queue_send_from_isr(&self, queue: KObj, item: &[u8]) -> bool {
        self.queue_send(queue, item, 0, SendPos::Back)
    }

    fn queue_receive(&self, queue: KObj, out: &mut [u8], _ticks: u32) -> bool {
        let mut st = self.state.lock();
        let Some(item) = st.queues.get_mut(&queue).and_then(|q| q.items.pop_front()) else {
            return false;
        };
        let n = out.len().min(item.len());
        out[..n].copy_from_slice(&item[..n]);
        true
    }

    fn queue_messages_waiting(&self, queue: KObj) -> usize {
        self.state.lock().queues.get(&queue).map_or(0, |q| q.items.len())
    }

    fn queue_delete(&self, queue: KObj) {
        let mut st = self.state.lock();
        if st.queues.remove(&queue).is_some() {
            st.free(queue);
        }
    }

    fn xtimer_create(&self, _period: u32, _auto_reload: bool, cookie: usize) -> Option<KObj> {
        let obj = self.alloc_obj()?;
        self.state.lock().xtimers.insert(obj, XTimer { cookie, active: false });
        Some(obj)
    }

    fn xtimer_command(&self, timer: KObj, cmd: TimerCmd, _value: u32, _ticks: u32) -> bool {
        let mut st = self.state.lock();
        if matches!(cmd, TimerCmd::Delete) {
            if st.xtimers.remove(&timer).is_none() {
                return false;
            }
            st.free(timer);
            return true;
        }
        let Some(t) = st.xtimers.get_mut(&timer) else {
            return false;
        };
        t.active = !matches!(cmd, TimerCmd::Stop);
        true
    }

    fn xtimer_cookie(&self, timer: KObj) -> usize {
        self.state.lock().xtimers.get(&timer).map_or(0, |t| t.cookie)
    }

    fn esp_timer_create(&self, cookie: usize, _skip_unhandled: bool) -> Result<KObj, RtosError> {
        let obj = self.alloc_obj().ok_or(RtosError::NoMem)?;
        self.state.lock().esp_timers.insert(obj, EspTimer { cookie, armed: false });
        Ok(obj)
    }

    fn esp_timer_cookie(&self, timer: KObj) -> usize {
        self.state.lock().esp_timers.get(&timer).map_or(0, |t| t.cookie)
    }

    fn esp_timer_start_once(&self, timer: KObj, _timeout_us: u64) -> Result<(), RtosError> {
        let mut st = self.state.lock();
        let t = st.esp_timers.get_mut(&timer).ok_or(RtosError::InvalidArg)?;
        if t.armed {
            return Err(RtosError::InvalidState);
        }
        t.armed = true;
        Ok(())
    }

    fn esp_timer_start_periodic(&self, timer: KObj, period_us: u64) -> Result<(), RtosError> {
        self.esp_timer_start_once(timer, period_us)
    }

    fn esp_timer_stop(&self, timer: KObj) -> Result<(), RtosError> {
        let mut st = self.state.lock();
        let t = st.esp_timers.get_mut(&timer).ok_or(RtosError::InvalidArg)?;
        if !t.armed {
            return Err(RtosError::InvalidState);
        }
        t.armed = false;
        Ok(())
    }

    fn esp_timer_delete(&self, timer: KObj) -> Result<(), RtosError> {
        let mut st = self.state.lock();
        match st.esp_timers.get(&timer) {
            None => Err(RtosError::InvalidArg),
            Some(t) if t.armed => Err(RtosError::InvalidState),
            Some(_) => {
                st.esp_timers.remove(&timer);
                st.free(timer);
                Ok(())
            }
        }
    }

    fn event_group_create(&self) -> Option<KObj> {
        let obj = self.alloc_obj()?;
        self.state.lock().groups.insert(obj, 0);
        Some(obj)
    }

    fn event_group_wait(&self, group: KObj, bits: u32, clear: bool, all: bool, _ticks: u32) -> u32 {
        let mut st = self.state.lock();
        let Some(value) = st.groups.get_mut(&group) else {
            return 0;
        };
        let current = *value;
        let met = if all { current & bits == bits } else { current & bits != 0 };
        if met && clear {
            *value &= !bits;
        }
        current
    }

    fn event_group_set(&self, group: KObj, bits: u32) -> u32 {
        let mut st = self.state.lock();
        st.groups.get_mut(&group).map_or(0, |value| {
            *value |= bits;
            *value
        })
    }

    fn event_group_clear(&self, group: KObj, bits: u32) -> u32 {
        let mut st = self.state.lock();
        st.groups.get_mut(&group).map_or(0, |value| {
            let before = *value;
            *value &= !bits;
            before
        })
    }

    fn event_group_sync(&self, group: KObj, set: u32, wait: u32, _ticks: u32) -> u32 {
        let mut st = self.state.lock();
        st.groups.get_mut(&group).map_or(0, |value| {
            *value |= set;
            let current = *value;
            if current & wait == wait {
                *value &= !wait;
            }
            current
        })
    }

    fn event_group_delete(&self, group: KObj) {
        let mut st = self.state.lock();
        if st.groups.remove(&group).is_some() {
            st.free(group);
        }
    }

    fn event_handler_register(&self, base: EventBase, id: i32, cookie: usize) -> Result<KObj, RtosError> {
        let instance = self.alloc_obj().ok_or(RtosError::NoMem)?;
        self.state.lock().handlers.insert(instance, Handler { base, id, cookie });
        Ok(instance)
    }

    fn event_handler_unregister(&self, base: EventBase, id: i32, instance: KObj) -> Result<(), RtosError> {
        let mut st = self.state.lock();
        match st.handlers.get(&instance) {
            Some(h) if h.base == base && h.id == id => {
                st.handlers.remove(&instance);
                st.free(instance);
                Ok(())
            }
            _ => Err(RtosError::NotFound),
        }
    }

    fn gpio_isr_add(&self, gpio: u32, cookie: usize) -> Result<(), RtosError> {
        let mut st = self.state.lock();
        if st.gpio.contains_key(&gpio) {
            return Err(RtosError::InvalidState);
        }
        st.gpio.insert(gpio, cookie);
        Ok(())
    }

    fn gpio_isr_remove(&self, gpio: u32) -> Result<(), RtosError> {
        self.state.lock().gpio.remove(&gpio).map(|_| ()).ok_or(RtosError::InvalidArg)
    }

    fn uart_write(&self, _port: u32, data: &[u8]) -> i32 {
        self.state.lock().uart_out.extend_from_slice(data);
        data.len() as i32
    }

    fn uart_read(&self, _port: u32, out: &mut [u8], _ticks: u32) -> i32 {
        let mut st = self.state.lock();
        let mut n = 0;
        for slot in out.iter_mut() {
            match st.uart_in.pop_front() {
                Some(byte) => {
                    *slot = byte;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    fn socket(&self, _domain: i32, _ty: i32, _protocol: i32) -> i32 {
        let mut st = self.state.lock();
        let fd = st.next_socket;
        st.next_socket += 1;
        st.sockets.push(fd);
        fd
    }

    fn send(&self, sock: i32, data: &[u8], _flags: i32) -> isize {
        if self.state.lock().sockets.contains(&sock) {
            data.len() as isize
        } else {
            -1
        }
    }

    fn recv(&self, sock: i32, _out: &mut [u8], _flags: i32) -> isize {
        if self.state.lock().sockets.contains(&sock) {
            0
        } else {
            -1
        }
    }

    fn close(&self, sock: i32) -> i32 {
        let mut st = self.state.lock();
        match st.sockets.iter().position(|s| *s == sock) {
            Some(i) => {
                st.sockets.remove(i);
                0
            }
            None => -1,
        }
    }

    fn netif_create_default_sta(&self) -> Option<KObj> {
        self.alloc_obj()
    }

    fn netif_destroy(&self, netif: KObj) {
        self.kfree(netif);
    }

    fn schedule_oneshot(&self, job: DeferredJob, _delay_us: u64) {
        self.state.lock().oneshots.push(job);
    }

    fn restart(&self) {
        self.state.lock().restarts += 1;
    }

    fn abort(&self, reason: &str) {
        self.state.lock().aborts.push(String::from(reason));
    }
}

impl Memory for SimPlatform {
    fn read(&self, addr: usize, out: &mut [u8]) {
        self.state.lock().read(addr, out);
    }

    fn write(&self, addr: usize, data: &[u8]) {
        self.state.lock().write(addr, data);
    }

    fn fill(&self, addr: usize, byte: u8, len: usize) {
        self.state.lock().write(addr, &vec![byte; len]);
    }
}

fn flash_range(offset: u32, len: usize) -> Result<core::ops::Range<usize>, FlashError> {
    let start = offset as usize;
    match start.checked_add(len) {
        Some(end) if end <= FLASH_SIZE => Ok(start..end),
        _ => Err(FlashError::OutOfRange),
    }
}

impl Flash for SimPlatform {
    fn flash_read(&self, offset: u32, out: &mut [u8]) -> Result<(), FlashError> {
        let range = flash_range(offset, out.len())?;
        out.copy_from_slice(&self.state.lock().flash[range]);
        Ok(())
    }

    fn flash_write(&self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        let range = flash_range(offset, data.len())?;
        self.state.lock().flash[range].copy_from_slice(data);
        Ok(())
    }

    fn flash_erase_sector(&self, offset: u32) -> Result<(), FlashError> {
        if offset % SECTOR_SIZE != 0 {
            return Err(FlashError::OutOfRange);
        }
        let range = flash_range(offset, SECTOR_SIZE as usize)?;
        self.state.lock().flash[range].fill(0xFF);
        Ok(())
    }
}

impl Platform for SimPlatform {
    type Regs = RegisterBank;

    fn regs(&self) -> &RegisterBank {
        &self.regs
    }

    fn vector_base(&self) -> u32 {
        Self::VECTOR_BASE
    }

    fn app_elf_sha256(&self) -> [u8; 32] {
        Self::ELF_SHA256
    }

    fn partitions(&self) -> PartitionTable {
        PartitionTable {
            otadata: Some(crate::fixtures::OTADATA),
            user_0: Some(crate::fixtures::USER_0),
            user_1: Some(crate::fixtures::USER_1),
        }
    }

    fn map_flash(&self, mapping: FlashMapping) {
        self.state.lock().mappings.push(mapping);
    }
}
