//! Task watchdog integration for the control loop.
//!
//! Subscribes the calling FreeRTOS task to ESP-IDF's Task Watchdog Timer
//! (TWDT), so a control loop stuck in a frame or a delay resets the chip.

use esp_idf_svc::sys::{esp_task_wdt_add, esp_task_wdt_delete, esp_task_wdt_reset, EspError};
use log::{debug, error};

/// The current task's watchdog subscription. Unsubscribes on drop.
pub struct TaskWatchdog {
    _not_send: core::marker::PhantomData<*const ()>,
}

impl TaskWatchdog {
    /// Subscribe the calling task.
    ///
    /// The handle is tied to the task that created it and can't be moved to
    /// another thread.
    pub fn subscribe() -> Result<Self, EspError> {
        // SAFETY: a null handle means "the calling task"
        EspError::convert(unsafe { esp_task_wdt_add(std::ptr::null_mut()) })?;
        debug!("Watchdog: subscribed control task");
        Ok(Self {
            _not_send: core::marker::PhantomData,
        })
    }

    /// Must be called within the TWDT timeout.
    pub fn feed(&self) {
        // SAFETY: only resets the calling task's own subscription
        let result = unsafe { esp_task_wdt_reset() };
        if result != 0 {
            error!("Watchdog: failed to feed control task: error code {result}");
        }
    }
}

impl Drop for TaskWatchdog {
    fn drop(&mut self) {
        debug!("Watchdog: unsubscribing control task");
        // SAFETY: removes the subscription made in `subscribe` for this task
        let result = unsafe { esp_task_wdt_delete(std::ptr::null_mut()) };
        if result != 0 {
            error!("Watchdog: failed to unsubscribe control task: error code {result}");
        }
    }
}
