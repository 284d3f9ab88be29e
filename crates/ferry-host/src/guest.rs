use crate::error::BridgeError;
use crate::loader::LoadError;
use crate::memory::GuestMemory;
use ferry_abi::exports;
use ferry_config::GuestConfig;
use wasmtime::{
    Engine, Instance, Linker, Memory, Module, Store, StoreLimits, StoreLimitsBuilder, TypedFunc,
};

/// Raw guest exports.
///
/// Every slice crosses this boundary as a packed `u64` (pointer in the low 32
/// bits, length in the high 32 bits). Ownership tracking of those values lives
/// in the bridge; implementations only forward calls.
pub trait GuestAbi: GuestMemory + Send {
    /// `allocateBytes(size) -> slice`
    fn allocate_bytes(&mut self, size: u32) -> Result<u64, BridgeError>;

    /// `freeBytes(slice)`
    fn free_bytes(&mut self, slice: u64) -> Result<(), BridgeError>;

    /// `invoke(input) -> output`
    fn invoke(&mut self, input: u64) -> Result<u64, BridgeError>;

    /// `getTask(requestId, taskId) -> output`
    fn get_task(&mut self, request_id: u32, task_id: u32) -> Result<u64, BridgeError>;

    /// `completeTask(requestId, taskId, result) -> output`
    fn complete_task(
        &mut self,
        request_id: u32,
        task_id: u32,
        result: u64,
    ) -> Result<u64, BridgeError>;
}

struct GuestState {
    limits: StoreLimits,
}

/// A single instantiated wasm guest running on wasmtime.
pub struct WasmGuest {
    store: Store<GuestState>,
    memory: Memory,
    allocate_bytes: TypedFunc<u32, u64>,
    free_bytes: TypedFunc<u64, ()>,
    invoke: TypedFunc<u64, u64>,
    get_task: TypedFunc<(u32, u32), u64>,
    complete_task: TypedFunc<(u32, u32, u64), u64>,
    #[cfg(test)]
    instance: Instance,
}

impl std::fmt::Debug for WasmGuest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmGuest")
            .field("memory_bytes", &self.memory_size())
            .finish_non_exhaustive()
    }
}

impl WasmGuest {
    /// Compiles and instantiates `bytes` (binary or text format), then runs the
    /// guest's `initialize` export once.
    pub fn from_bytes(bytes: &[u8], config: &GuestConfig) -> Result<Self, LoadError> {
        let binary = wat::parse_bytes(bytes).map_err(|e| LoadError::Compile(e.to_string()))?;
        let engine = Engine::default();
        let module =
            Module::new(&engine, &*binary).map_err(|e| LoadError::Compile(format!("{e:#}")))?;
        Self::instantiate(&engine, &module, config)
    }

    pub fn from_wat(wat: &str, config: &GuestConfig) -> Result<Self, LoadError> {
        Self::from_bytes(wat.as_bytes(), config)
    }

    fn instantiate(
        engine: &Engine,
        module: &Module,
        config: &GuestConfig,
    ) -> Result<Self, LoadError> {
        let mut limits = StoreLimitsBuilder::new();
        if let Some(max) = config.max_memory_bytes {
            limits = limits.memory_size(usize::try_from(max).unwrap_or(usize::MAX));
        }
        let mut store = Store::new(
            engine,
            GuestState {
                limits: limits.build(),
            },
        );
        store.limiter(|state| &mut state.limits);

        let linker = Linker::new(engine);
        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| LoadError::Instantiate(format!("{e:#}")))?;

        let memory = instance
            .get_memory(&mut store, exports::MEMORY)
            .ok_or(LoadError::MissingExport(exports::MEMORY))?;
        let initialize: TypedFunc<(), ()> = typed(&instance, &mut store, exports::INITIALIZE)?;
        let allocate_bytes = typed(&instance, &mut store, exports::ALLOCATE_BYTES)?;
        let free_bytes = typed(&instance, &mut store, exports::FREE_BYTES)?;
        let invoke = typed(&instance, &mut store, exports::INVOKE)?;
        let get_task = typed(&instance, &mut store, exports::GET_TASK)?;
        let complete_task = typed(&instance, &mut store, exports::COMPLETE_TASK)?;

        initialize
            .call(&mut store, ())
            .map_err(|e| LoadError::Initialize(format!("{e:#}")))?;

        tracing::debug!(
            memory_bytes = memory.data_size(&store),
            max_memory_bytes = ?config.max_memory_bytes,
            "wasm guest instantiated"
        );

        Ok(Self {
            store,
            memory,
            allocate_bytes,
            free_bytes,
            invoke,
            get_task,
            complete_task,
            #[cfg(test)]
            instance,
        })
    }

    /// Current size of the guest's linear memory in bytes.
    pub fn memory_size(&self) -> usize {
        self.memory.data_size(&self.store)
    }

    #[cfg(test)]
    pub(crate) fn global_i32(&mut self, name: &str) -> Option<i32> {
        self.instance
            .get_global(&mut self.store, name)
            .and_then(|global| global.get(&mut self.store).i32())
    }
}

fn typed<Params, Results>(
    instance: &Instance,
    store: &mut Store<GuestState>,
    name: &'static str,
) -> Result<TypedFunc<Params, Results>, LoadError>
where
    Params: wasmtime::WasmParams,
    Results: wasmtime::WasmResults,
{
    instance
        .get_typed_func(&mut *store, name)
        .map_err(|_| LoadError::MissingExport(name))
}

fn call_failed(operation: &'static str) -> impl FnOnce(wasmtime::Error) -> BridgeError {
    move |err| BridgeError::Guest {
        operation,
        message: format!("{err:#}"),
    }
}

impl GuestMemory for WasmGuest {
    fn read(&self, pointer: u32, out: &mut [u8]) -> Result<(), BridgeError> {
        self.memory
            .read(&self.store, pointer as usize, out)
            .map_err(|err| BridgeError::Guest {
                operation: "memory.read",
                message: format!("{err} (pointer={pointer}, len={})", out.len()),
            })
    }

    fn write(&mut self, pointer: u32, data: &[u8]) -> Result<(), BridgeError> {
        self.memory
            .write(&mut self.store, pointer as usize, data)
            .map_err(|err| BridgeError::Guest {
                operation: "memory.write",
                message: format!("{err} (pointer={pointer}, len={})", data.len()),
            })
    }
}

impl GuestAbi for WasmGuest {
    fn allocate_bytes(&mut self, size: u32) -> Result<u64, BridgeError> {
        self.allocate_bytes
            .call(&mut self.store, size)
            .map_err(call_failed(exports::ALLOCATE_BYTES))
    }

    fn free_bytes(&mut self, slice: u64) -> Result<(), BridgeError> {
        self.free_bytes
            .call(&mut self.store, slice)
            .map_err(call_failed(exports::FREE_BYTES))
    }

    fn invoke(&mut self, input: u64) -> Result<u64, BridgeError> {
        self.invoke
            .call(&mut self.store, input)
            .map_err(call_failed(exports::INVOKE))
    }

    fn get_task(&mut self, request_id: u32, task_id: u32) -> Result<u64, BridgeError> {
        self.get_task
            .call(&mut self.store, (request_id, task_id))
            .map_err(call_failed(exports::GET_TASK))
    }

    fn complete_task(
        &mut self,
        request_id: u32,
        task_id: u32,
        result: u64,
    ) -> Result<u64, BridgeError> {
        self.complete_task
            .call(&mut self.store, (request_id, task_id, result))
            .map_err(call_failed(exports::COMPLETE_TASK))
    }
}

#[cfg(test)]
mod tests;
