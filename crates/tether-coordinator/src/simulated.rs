//! Simulated runtime
//!
//! Stands in for a real backend on virtual devices. It recognises a handful
//! of statement shapes and ignores everything else:
//!
//! - `print(<literal or expression>)` echoes the argument
//! - `raise <anything>` fails the execution
//! - `pin <n> = <value>` writes the pin through the hardware registry
//! - `time.sleep(<secs>)` waits, honouring cancellation
//!
//! It is a simulation aid, not an interpreter.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tether_hardware::{ClaimOutcome, HardwareRegistry};
use tether_types::{
    AbstractionId, DeviceHooks, DeviceId, ExecutionContext, InterruptHook, PinMode, PinValue,
    Runtime, RuntimeError, RuntimeExecutionResult, RuntimeInfo, RuntimeType,
};
use tracing::debug;

const INTERRUPTED: &str = "KeyboardInterrupt";

/// One recognised statement
#[derive(Debug, Clone, PartialEq)]
enum Statement<'a> {
    Print(&'a str),
    Raise(&'a str),
    Pin { pin: u8, value: PinValue },
    Sleep(Duration),
    Other,
}

fn unquote(s: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|r| r.strip_suffix(quote)) {
            return inner;
        }
    }
    s
}

fn parse_pin_value(raw: &str) -> Option<PinValue> {
    match raw.to_lowercase().as_str() {
        "true" | "high" | "on" | "1" => Some(PinValue::Digital(true)),
        "false" | "low" | "off" | "0" => Some(PinValue::Digital(false)),
        other => other.parse::<f64>().ok().filter(|v| v.is_finite()).map(PinValue::Analog),
    }
}

fn parse_statement(line: &str) -> Statement<'_> {
    let stmt = line.trim();

    if let Some(arg) = stmt.strip_prefix("print(").and_then(|r| r.strip_suffix(')')) {
        return Statement::Print(unquote(arg.trim()));
    }

    if let Some(rest) = stmt.strip_prefix("raise") {
        if rest.is_empty() || rest.starts_with([' ', '(']) {
            return Statement::Raise(rest.trim());
        }
    }

    if let Some((target, value)) = stmt.strip_prefix("pin ").and_then(|r| r.split_once('=')) {
        if let (Ok(pin), Some(value)) = (target.trim().parse::<u8>(), parse_pin_value(value.trim())) {
            return Statement::Pin { pin, value };
        }
    }

    if let Some(arg) = stmt.strip_prefix("time.sleep(").and_then(|r| r.strip_suffix(')')) {
        if let Some(duration) = arg
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        {
            return Statement::Sleep(duration);
        }
    }

    Statement::Other
}

/// Simulated runtime backend
pub struct SimulatedRuntime {
    runtime_type: RuntimeType,
    hardware: Arc<HardwareRegistry>,
    ready: AtomicBool,
    attached: DashMap<DeviceId, DateTime<Utc>>,
    interrupts: AtomicUsize,
}

impl SimulatedRuntime {
    pub fn new(runtime_type: RuntimeType, hardware: Arc<HardwareRegistry>) -> Self {
        Self {
            runtime_type,
            hardware,
            ready: AtomicBool::new(false),
            attached: DashMap::new(),
            interrupts: AtomicUsize::new(0),
        }
    }

    /// Devices attached through the connect hook
    pub fn attached_devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self.attached.iter().map(|e| e.key().clone()).collect();
        devices.sort();
        devices
    }

    pub fn interrupt_count(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    /// Force the liveness flag, e.g. to exercise health monitoring
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    fn write_pin(
        &self,
        abstraction_id: &AbstractionId,
        pin: u8,
        value: PinValue,
        stderr: &mut String,
    ) -> Result<(), String> {
        let mode = match value {
            PinValue::Digital(_) => PinMode::Output,
            PinValue::Analog(_) => PinMode::Analog,
            PinValue::Duty(_) => PinMode::Pwm,
        };
        match self.hardware.set_pin_state(abstraction_id, pin, mode, Some(value)) {
            Ok(ClaimOutcome::Denied { owner }) => {
                stderr.push_str(&format!("warning: pin {} is owned by {}\n", pin, owner));
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[async_trait]
impl Runtime for SimulatedRuntime {
    fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    fn info(&self) -> RuntimeInfo {
        RuntimeInfo::new(self.runtime_type, "simulated")
    }

    async fn initialize(&self) -> Result<(), RuntimeError> {
        self.ready.store(true, Ordering::SeqCst);
        debug!(runtime = %self.runtime_type, "Simulated runtime initialized");
        Ok(())
    }

    async fn dispose(&self) -> Result<(), RuntimeError> {
        self.ready.store(false, Ordering::SeqCst);
        self.attached.clear();
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn execute_code(
        &self,
        code: &str,
        ctx: &ExecutionContext,
    ) -> Result<RuntimeExecutionResult, RuntimeError> {
        if !self.is_ready() {
            return Err(RuntimeError::NotInitialized(self.runtime_type));
        }

        let abstraction_id = AbstractionId::for_binding(&ctx.device_id, self.runtime_type);
        let mut stdout = String::new();
        let mut stderr = String::new();

        for line in code.lines() {
            if ctx.cancellation.is_cancelled() {
                return Ok(RuntimeExecutionResult {
                    stdout,
                    ..RuntimeExecutionResult::failed(INTERRUPTED)
                });
            }

            match parse_statement(line) {
                Statement::Print(text) => {
                    stdout.push_str(text);
                    stdout.push('\n');
                }
                Statement::Raise(what) => {
                    let message = if what.is_empty() { "Exception" } else { what };
                    return Ok(RuntimeExecutionResult {
                        stdout,
                        ..RuntimeExecutionResult::failed(message)
                    });
                }
                Statement::Pin { pin, value } => {
                    if let Err(message) = self.write_pin(&abstraction_id, pin, value, &mut stderr) {
                        return Ok(RuntimeExecutionResult {
                            stdout,
                            ..RuntimeExecutionResult::failed(message)
                        });
                    }
                }
                Statement::Sleep(duration) => {
                    tokio::select! {
                        _ = ctx.cancellation.cancelled() => {
                            return Ok(RuntimeExecutionResult {
                                stdout,
                                ..RuntimeExecutionResult::failed(INTERRUPTED)
                            });
                        }
                        _ = tokio::time::sleep(duration) => {}
                    }
                }
                Statement::Other => {}
            }
        }

        Ok(RuntimeExecutionResult {
            success: true,
            stdout,
            stderr,
            return_value: None,
            memory_used: None,
        })
    }

    fn device_hooks(&self) -> Option<&dyn DeviceHooks> {
        Some(self)
    }

    fn interrupt_hook(&self) -> Option<&dyn InterruptHook> {
        Some(self)
    }
}

#[async_trait]
impl DeviceHooks for SimulatedRuntime {
    async fn connect_to_device(&self, device_id: &DeviceId) -> Result<(), RuntimeError> {
        self.attached.insert(device_id.clone(), Utc::now());
        Ok(())
    }

    async fn disconnect_from_device(&self, device_id: &DeviceId) -> Result<(), RuntimeError> {
        self.attached.remove(device_id);
        Ok(())
    }
}

#[async_trait]
impl InterruptHook for SimulatedRuntime {
    async fn interrupt(&self, device_id: &DeviceId) -> Result<(), RuntimeError> {
        debug!(device_id = %device_id, runtime = %self.runtime_type, "Simulated interrupt");
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_hardware::HardwareConfig;
    use tether_types::{ConflictResolution, EventBus, ExecutionId, ExecutionMode, ResourceKey};
    use tokio_util::sync::CancellationToken;

    fn ctx(device: &str) -> ExecutionContext {
        ExecutionContext {
            execution_id: ExecutionId::generate(),
            device_id: DeviceId::new(device),
            mode: ExecutionMode::Repl,
            timeout: Duration::from_secs(30),
            cancellation: CancellationToken::new(),
        }
    }

    async fn runtime(strategy: ConflictResolution) -> (SimulatedRuntime, Arc<HardwareRegistry>) {
        let hardware = Arc::new(HardwareRegistry::new(
            HardwareConfig {
                conflict_resolution: strategy,
                ..Default::default()
            },
            EventBus::new(),
        ));
        let runtime = SimulatedRuntime::new(RuntimeType::CircuitPython, hardware.clone());
        runtime.initialize().await.unwrap();
        (runtime, hardware)
    }

    fn register(hardware: &HardwareRegistry, device: &str, is_virtual: bool) -> AbstractionId {
        let id = AbstractionId::for_binding(&DeviceId::new(device), RuntimeType::CircuitPython);
        hardware
            .register_hardware_abstraction(id.clone(), DeviceId::new(device), RuntimeType::CircuitPython, is_virtual)
            .unwrap();
        id
    }

    #[test]
    fn test_parse_statements() {
        assert_eq!(parse_statement("print('hi')"), Statement::Print("hi"));
        assert_eq!(parse_statement("  print(1)"), Statement::Print("1"));
        assert_eq!(parse_statement("raise Exception()"), Statement::Raise("Exception()"));
        assert_eq!(parse_statement("raised = 1"), Statement::Other);
        assert_eq!(
            parse_statement("pin 5 = high"),
            Statement::Pin {
                pin: 5,
                value: PinValue::Digital(true)
            }
        );
        assert_eq!(
            parse_statement("pin 2 = 0.5"),
            Statement::Pin {
                pin: 2,
                value: PinValue::Analog(0.5)
            }
        );
        assert_eq!(parse_statement("pin 300 = 1"), Statement::Other);
        assert_eq!(parse_statement("time.sleep(0.25)"), Statement::Sleep(Duration::from_millis(250)));
        assert_eq!(parse_statement("time.sleep(-1)"), Statement::Other);
        assert_eq!(parse_statement("time.sleep(1e300)"), Statement::Other);
        assert_eq!(parse_statement("time.sleep(inf)"), Statement::Other);
    }

    #[tokio::test]
    async fn test_print_and_raise() {
        let (runtime, _) = runtime(ConflictResolution::PriorityBased).await;

        let ok = runtime.execute_code("print('a')\nx = 1\nprint(\"b\")", &ctx("d1")).await.unwrap();
        assert!(ok.success);
        assert_eq!(ok.stdout, "a\nb\n");

        let failed = runtime
            .execute_code("print('before')\nraise ValueError('bad')\nprint('after')", &ctx("d1"))
            .await
            .unwrap();
        assert!(!failed.success);
        assert_eq!(failed.stdout, "before\n");
        assert_eq!(failed.stderr, "ValueError('bad')");
    }

    #[tokio::test]
    async fn test_unrepresentable_sleep_is_ignored() {
        let (runtime, _) = runtime(ConflictResolution::PriorityBased).await;

        let result = runtime
            .execute_code("time.sleep(1e300)\nprint('done')", &ctx("d1"))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.stdout, "done\n");
    }

    #[tokio::test]
    async fn test_not_initialized() {
        let hardware = Arc::new(HardwareRegistry::new(HardwareConfig::default(), EventBus::new()));
        let runtime = SimulatedRuntime::new(RuntimeType::MicroPython, hardware);
        let err = runtime.execute_code("print(1)", &ctx("d1")).await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotInitialized(RuntimeType::MicroPython)));
    }

    #[tokio::test]
    async fn test_pin_write_goes_through_registry() {
        let (runtime, hardware) = runtime(ConflictResolution::PriorityBased).await;
        let id = register(&hardware, "d1", false);

        let result = runtime.execute_code("pin 5 = 1", &ctx("d1")).await.unwrap();
        assert!(result.success);
        assert_eq!(hardware.resource_owner(&ResourceKey::Pin(5)), Some(id));
        assert_eq!(
            hardware.get_pin_state(5).and_then(|p| p.value),
            Some(PinValue::Digital(true))
        );
    }

    #[tokio::test]
    async fn test_denied_pin_write_warns() {
        let (runtime, hardware) = runtime(ConflictResolution::FirstWins).await;
        let owner = register(&hardware, "d1", false);
        register(&hardware, "d2", true);

        runtime.execute_code("pin 5 = 1", &ctx("d1")).await.unwrap();
        let result = runtime.execute_code("pin 5 = 0", &ctx("d2")).await.unwrap();

        assert!(result.success);
        assert!(result.stderr.contains("pin 5 is owned by"));
        assert_eq!(hardware.resource_owner(&ResourceKey::Pin(5)), Some(owner));
    }

    #[tokio::test]
    async fn test_pin_write_without_abstraction_fails() {
        let (runtime, _) = runtime(ConflictResolution::PriorityBased).await;
        let result = runtime.execute_code("pin 5 = 1", &ctx("unregistered")).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_honours_cancellation() {
        let (runtime, _) = runtime(ConflictResolution::PriorityBased).await;
        let ctx = ctx("d1");
        let token = ctx.cancellation.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let result = runtime
            .execute_code("print('start')\ntime.sleep(60)\nprint('end')", &ctx)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.stdout, "start\n");
        assert_eq!(result.stderr, INTERRUPTED);
    }

    #[tokio::test]
    async fn test_hooks_track_attached_devices() {
        let (runtime, _) = runtime(ConflictResolution::PriorityBased).await;
        let hooks = runtime.device_hooks().unwrap();
        hooks.connect_to_device(&DeviceId::new("b")).await.unwrap();
        hooks.connect_to_device(&DeviceId::new("a")).await.unwrap();
        hooks.disconnect_from_device(&DeviceId::new("b")).await.unwrap();
        assert_eq!(runtime.attached_devices(), vec![DeviceId::new("a")]);

        runtime.interrupt_hook().unwrap().interrupt(&DeviceId::new("a")).await.unwrap();
        assert_eq!(runtime.interrupt_count(), 1);

        runtime.dispose().await.unwrap();
        assert!(runtime.attached_devices().is_empty());
        assert!(!runtime.is_ready());
    }
}
