use std::mem::size_of;
use std::ptr::null_mut;

use windows::Win32::Foundation::{
    CloseHandle, ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER, HANDLE, HWND, LPARAM,
};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW, THREADENTRY32,
    TH32CS_SNAPPROCESS, TH32CS_SNAPTHREAD, Thread32First, Thread32Next,
};
use windows::Win32::System::SystemInformation::{
    GROUP_AFFINITY, GetLogicalProcessorInformationEx, GetNumaAvailableMemoryNodeEx,
    GetNumaHighestNodeNumber, GetNumaNodeProcessorMaskEx, GetSystemInfo, RelationProcessorCore,
    SYSTEM_INFO, SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX,
};
use windows::Win32::System::Threading::{
    ABOVE_NORMAL_PRIORITY_CLASS, BELOW_NORMAL_PRIORITY_CLASS, HIGH_PRIORITY_CLASS,
    IDLE_PRIORITY_CLASS, NORMAL_PRIORITY_CLASS, OpenProcess, OpenThread, PROCESS_ACCESS_RIGHTS,
    PROCESS_CREATION_FLAGS, PROCESS_SET_INFORMATION, REALTIME_PRIORITY_CLASS, SetPriorityClass,
    SetProcessAffinityMask, SetThreadAffinityMask, THREAD_QUERY_INFORMATION,
    THREAD_SET_INFORMATION,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowTextLengthW, GetWindowTextW, GetWindowThreadProcessId, IsWindowVisible,
};
use windows::core::BOOL;

use winreg::RegKey;
use winreg::enums::*;

use crate::{NumaNodeRecord, OsError, PriorityClass, ProcessEntry, ProcessorCoreRecord};

// ---- tiny RAII helper ----
struct HandleGuard(HANDLE);
impl Drop for HandleGuard {
    fn drop(&mut self) {
        unsafe {
            if !self.0.is_invalid() {
                let _ = CloseHandle(self.0);
            }
        }
    }
}

pub struct OS;

impl OS {
    // ---- helpers ----

    fn classify(target: &'static str, id: u32, e: windows::core::Error) -> OsError {
        let code = e.code();
        if code == ERROR_ACCESS_DENIED.to_hresult() {
            OsError::Denied {
                target,
                id,
                reason: e.message().to_string(),
            }
        } else if code == ERROR_INVALID_PARAMETER.to_hresult() {
            // OpenProcess/OpenThread report a dead id as an invalid parameter
            OsError::Vanished { target, id }
        } else {
            OsError::Other(format!("{target} {id}: {e}"))
        }
    }

    fn open_process(pid: u32, access: PROCESS_ACCESS_RIGHTS) -> Result<HANDLE, OsError> {
        unsafe { OpenProcess(access, false, pid) }.map_err(|e| Self::classify("process", pid, e))
    }

    // helper: map our PriorityClass to WinAPI constant
    fn transform_to_win_priority(p: PriorityClass) -> PROCESS_CREATION_FLAGS {
        match p {
            PriorityClass::Idle => IDLE_PRIORITY_CLASS,
            PriorityClass::BelowNormal => BELOW_NORMAL_PRIORITY_CLASS,
            PriorityClass::Normal => NORMAL_PRIORITY_CLASS,
            PriorityClass::AboveNormal => ABOVE_NORMAL_PRIORITY_CLASS,
            PriorityClass::High => HIGH_PRIORITY_CLASS,
            PriorityClass::Realtime => REALTIME_PRIORITY_CLASS,
        }
    }

    fn wide_to_string(buf: &[u16]) -> String {
        let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
        String::from_utf16_lossy(&buf[..len])
    }

    /// Walks the Toolhelp process list, returning `(pid, exe name)` pairs.
    fn snapshot_processes() -> Vec<(u32, String)> {
        let mut results = Vec::new();
        unsafe {
            let snap = match CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) {
                Ok(s) => s,
                Err(_) => return results,
            };
            let _hg = HandleGuard(snap);

            let mut pe: PROCESSENTRY32W = std::mem::zeroed();
            pe.dwSize = size_of::<PROCESSENTRY32W>() as u32;

            if Process32FirstW(snap, &mut pe).is_err() {
                return results;
            }

            loop {
                results.push((pe.th32ProcessID, Self::wide_to_string(&pe.szExeFile)));
                if Process32NextW(snap, &mut pe).is_err() {
                    break;
                }
            }
        }
        results
    }

    /// Thread ids grouped by the owning pids in `pids`, from one Toolhelp thread snapshot.
    fn snapshot_threads(pids: &[u32]) -> std::collections::HashMap<u32, Vec<u32>> {
        let mut threads: std::collections::HashMap<u32, Vec<u32>> =
            std::collections::HashMap::new();
        unsafe {
            let snap = match CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0) {
                Ok(s) => s,
                Err(_) => return threads,
            };
            let _hg = HandleGuard(snap);

            let mut te: THREADENTRY32 = std::mem::zeroed();
            te.dwSize = size_of::<THREADENTRY32>() as u32;

            if Thread32First(snap, &mut te).is_err() {
                return threads;
            }

            loop {
                if pids.contains(&te.th32OwnerProcessID) {
                    threads
                        .entry(te.th32OwnerProcessID)
                        .or_default()
                        .push(te.th32ThreadID);
                }
                te.dwSize = size_of::<THREADENTRY32>() as u32;
                if Thread32Next(snap, &mut te).is_err() {
                    break;
                }
            }
        }
        threads
    }

    /// Title of the first visible top-level window owned by `pid`.
    fn window_title_by_pid(pid: u32) -> Option<String> {
        #[repr(C)]
        struct Ctx {
            target_pid: u32,
            found: HWND,
        }

        unsafe extern "system" fn enum_windows_proc(hwnd: HWND, lparam: LPARAM) -> BOOL {
            let ctx = unsafe { &mut *(lparam.0 as *mut Ctx) };

            let mut window_pid = 0u32;
            unsafe {
                GetWindowThreadProcessId(hwnd, Some(&mut window_pid));
            }

            if window_pid == ctx.target_pid && unsafe { IsWindowVisible(hwnd).as_bool() } {
                ctx.found = hwnd;
                return BOOL(0); // stop enumeration
            }

            BOOL(1)
        }

        unsafe {
            let mut ctx = Box::new(Ctx {
                target_pid: pid,
                found: HWND(null_mut()),
            });

            let ctx_ptr = ctx.as_mut() as *mut Ctx;
            let _ = EnumWindows(Some(enum_windows_proc), LPARAM(ctx_ptr as isize));

            if ctx.found.0.is_null() {
                return None;
            }

            let len = GetWindowTextLengthW(ctx.found);
            if len <= 0 {
                return None;
            }
            let mut buf = vec![0u16; len as usize + 1];
            let copied = GetWindowTextW(ctx.found, &mut buf);
            if copied <= 0 {
                return None;
            }
            Some(String::from_utf16_lossy(&buf[..copied as usize]))
        }
    }

    // ---- affinity & priority ----

    /// Sets the CPU affinity mask for a process by PID.
    pub fn set_process_affinity_by_pid(pid: u32, mask: u64) -> Result<(), OsError> {
        if mask == 0 {
            return Err(OsError::EmptyMask);
        }
        unsafe {
            let handle = Self::open_process(pid, PROCESS_SET_INFORMATION)?;
            let _hg = HandleGuard(handle);

            SetProcessAffinityMask(handle, mask as usize)
                .map_err(|e| Self::classify("process", pid, e))
        }
    }

    /// Sets the CPU affinity mask for a single thread.
    pub fn set_thread_affinity_by_tid(tid: u32, mask: u64) -> Result<(), OsError> {
        if mask == 0 {
            return Err(OsError::EmptyMask);
        }
        unsafe {
            let handle = OpenThread(THREAD_SET_INFORMATION | THREAD_QUERY_INFORMATION, false, tid)
                .map_err(|e| Self::classify("thread", tid, e))?;
            let _hg = HandleGuard(handle);

            if SetThreadAffinityMask(handle, mask as usize) == 0 {
                return Err(Self::classify("thread", tid, windows::core::Error::from_thread()));
            }
            Ok(())
        }
    }

    /// Sets the priority class for a process by PID.
    pub fn set_process_priority_by_pid(pid: u32, priority: PriorityClass) -> Result<(), OsError> {
        unsafe {
            let handle = Self::open_process(pid, PROCESS_SET_INFORMATION)?;
            let _hg = HandleGuard(handle);

            SetPriorityClass(handle, Self::transform_to_win_priority(priority))
                .map_err(|e| Self::classify("process", pid, e))
        }
    }

    // ---- process discovery ----

    pub fn thread_ids(pid: u32) -> Vec<u32> {
        Self::snapshot_threads(&[pid]).remove(&pid).unwrap_or_default()
    }

    /// Returns every live process whose executable name satisfies `matches`, with its
    /// thread ids and main window title.
    pub fn find_processes<F>(matches: F) -> Vec<ProcessEntry>
    where
        F: Fn(&str) -> bool,
    {
        let matched: Vec<(u32, String)> = Self::snapshot_processes()
            .into_iter()
            .filter(|(pid, name)| *pid != 0 && matches(name))
            .collect();
        if matched.is_empty() {
            return Vec::new();
        }

        let pids: Vec<u32> = matched.iter().map(|(pid, _)| *pid).collect();
        let mut threads = Self::snapshot_threads(&pids);

        let mut results: Vec<ProcessEntry> = matched
            .into_iter()
            .map(|(pid, name)| ProcessEntry {
                pid,
                name,
                window_title: Self::window_title_by_pid(pid),
                thread_ids: threads.remove(&pid).unwrap_or_default(),
            })
            .collect();
        results.sort_by_key(|p| p.pid);
        results
    }

    // ---- processor description ----

    pub fn get_cpu_model() -> String {
        let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
        hklm.open_subkey(r"HARDWARE\DESCRIPTION\System\CentralProcessor\0")
            .and_then(|key| {
                let s: String = key.get_value("ProcessorNameString")?;
                Ok(s.trim_matches(|c: char| c.is_whitespace() || c == '\0')
                    .to_string())
            })
            .unwrap_or_else(|_| "Unknown CPU".to_string())
    }

    pub fn logical_processor_count() -> usize {
        let mut info = SYSTEM_INFO::default();
        unsafe { GetSystemInfo(&mut info) };
        (info.dwNumberOfProcessors as usize).max(1)
    }

    /// One record per `RelationProcessorCore` entry, processor group 0 only.
    pub fn query_processor_topology() -> Result<Vec<ProcessorCoreRecord>, OsError> {
        let mut len: u32 = 0;
        unsafe {
            // First call only reports the required buffer size.
            let _ = GetLogicalProcessorInformationEx(RelationProcessorCore, None, &mut len);
            if len == 0 {
                return Err(OsError::Other(
                    "GetLogicalProcessorInformationEx reported no data".into(),
                ));
            }

            // u64 backing keeps the records 8-byte aligned.
            let mut buffer: Vec<u64> = vec![0; (len as usize).div_ceil(size_of::<u64>())];
            GetLogicalProcessorInformationEx(
                RelationProcessorCore,
                Some(buffer.as_mut_ptr() as *mut SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX),
                &mut len,
            )
            .map_err(|e| OsError::Other(format!("GetLogicalProcessorInformationEx: {e}")))?;

            let mut records = Vec::new();
            let mut offset = 0usize;
            while offset < len as usize {
                let info = &*((buffer.as_ptr() as *const u8).add(offset)
                    as *const SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX);
                if info.Size == 0 {
                    break;
                }
                if info.Relationship == RelationProcessorCore {
                    let processor = &info.Anonymous.Processor;
                    let group = processor.GroupMask[0];
                    if group.Group == 0 && group.Mask != 0 {
                        records.push(ProcessorCoreRecord {
                            group_mask: group.Mask as u64,
                            efficiency_class: processor.EfficiencyClass,
                        });
                    }
                }
                offset += info.Size as usize;
            }
            Ok(records)
        }
    }

    pub fn query_numa_nodes() -> Result<Vec<NumaNodeRecord>, OsError> {
        let mut highest: u32 = 0;
        unsafe {
            GetNumaHighestNodeNumber(&mut highest)
                .map_err(|e| OsError::Other(format!("GetNumaHighestNodeNumber: {e}")))?;

            let mut nodes = Vec::new();
            for node in 0..=highest {
                let node = node as u16;
                let mut affinity = GROUP_AFFINITY::default();
                if GetNumaNodeProcessorMaskEx(node, &mut affinity).is_err() {
                    continue;
                }
                let mut available: u64 = 0;
                let _ = GetNumaAvailableMemoryNodeEx(node, &mut available);

                let processor_mask = if affinity.Group == 0 {
                    affinity.Mask as u64
                } else {
                    0
                };
                nodes.push(NumaNodeRecord {
                    node_id: node as u32,
                    processor_mask,
                    available_memory_bytes: available,
                });
            }
            Ok(nodes)
        }
    }
}
