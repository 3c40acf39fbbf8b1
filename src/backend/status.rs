//! Backend status codes and their human-readable text.
//!
//! Codes follow the OpenCL numbering so a native backend can pass its
//! `cl_int` through unchanged.

use std::fmt;

/// Non-success status returned by a compute backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct BackendStatus(pub i32);

impl BackendStatus {
    pub const DEVICE_NOT_FOUND: Self = Self(-1);
    pub const DEVICE_NOT_AVAILABLE: Self = Self(-2);
    pub const COMPILER_NOT_AVAILABLE: Self = Self(-3);
    pub const MEM_OBJECT_ALLOCATION_FAILURE: Self = Self(-4);
    pub const OUT_OF_RESOURCES: Self = Self(-5);
    pub const OUT_OF_HOST_MEMORY: Self = Self(-6);
    pub const BUILD_PROGRAM_FAILURE: Self = Self(-11);
    pub const MAP_FAILURE: Self = Self(-12);
    pub const INVALID_VALUE: Self = Self(-30);
    pub const INVALID_DEVICE_TYPE: Self = Self(-31);
    pub const INVALID_PLATFORM: Self = Self(-32);
    pub const INVALID_DEVICE: Self = Self(-33);
    pub const INVALID_CONTEXT: Self = Self(-34);
    pub const INVALID_COMMAND_QUEUE: Self = Self(-36);
    pub const INVALID_HOST_PTR: Self = Self(-37);
    pub const INVALID_MEM_OBJECT: Self = Self(-38);
    pub const INVALID_BUILD_OPTIONS: Self = Self(-43);
    pub const INVALID_PROGRAM: Self = Self(-44);
    pub const INVALID_PROGRAM_EXECUTABLE: Self = Self(-45);
    pub const INVALID_KERNEL_NAME: Self = Self(-46);
    pub const INVALID_KERNEL: Self = Self(-48);
    pub const INVALID_OPERATION: Self = Self(-59);
    pub const INVALID_BUFFER_SIZE: Self = Self(-61);

    /// Raw status code.
    pub fn code(self) -> i32 {
        self.0
    }

    /// Human-readable status text, `"unknown error"` for unmapped codes.
    pub fn text(self) -> &'static str {
        match self.0 {
            -1 => "DEVICE NOT FOUND",
            -2 => "DEVICE NOT AVAILABLE",
            -3 => "COMPILER NOT AVAILABLE",
            -4 => "MEM OBJECT ALLOCATION FAILURE",
            -5 => "OUT OF RESOURCES",
            -6 => "OUT OF HOST MEMORY",
            -7 => "PROFILING INFO NOT AVAILABLE",
            -8 => "MEM COPY OVERLAP",
            -9 => "IMAGE FORMAT MISMATCH",
            -10 => "IMAGE FORMAT NOT_SUPPORTED",
            -11 => "BUILD PROGRAM FAILURE",
            -12 => "MAP FAILURE",
            -13 => "MISALIGNED SUB BUFFER OFFSET",
            -14 => "EXEC STATUS ERROR FOR EVENTS IN WAIT LIST",
            -15 => "COMPILE PROGRAM FAILURE",
            -16 => "LINKER NOT AVAILABLE",
            -17 => "LINK PROGRAM FAILURE",
            -18 => "DEVICE PARTITION FAILED",
            -19 => "KERNEL ARG INFO NOT AVAILABLE",
            -30 => "INVALID VALUE",
            -31 => "INVALID DEVICE TYPE",
            -32 => "INVALID PLATFORM",
            -33 => "INVALID DEVICE",
            -34 => "INVALID CONTEXT",
            -35 => "INVALID QUEUE PROPERTIES",
            -36 => "INVALID COMMAND QUEUE",
            -37 => "INVALID HOST PTR",
            -38 => "INVALID MEM OBJECT",
            -39 => "INVALID IMAGE FORMAT DESCRIPTOR",
            -40 => "INVALID IMAGE SIZE",
            -41 => "INVALID SAMPLER",
            -42 => "INVALID BINARY",
            -43 => "INVALID BUILD OPTIONS",
            -44 => "INVALID PROGRAM",
            -45 => "INVALID PROGRAM EXECUTABLE",
            -46 => "INVALID KERNEL NAME",
            -47 => "INVALID KERNEL DEFINITION",
            -48 => "INVALID KERNEL",
            -49 => "INVALID ARG INDEX",
            -50 => "INVALID ARG VALUE",
            -51 => "INVALID ARG_SIZE",
            -52 => "INVALID KERNEL ARGS",
            -53 => "INVALID WORK DIMENSION",
            -54 => "INVALID WORK GROUP SIZE",
            -55 => "INVALID WORK ITEM SIZE",
            -56 => "INVALID GLOBAL OFFSET",
            -57 => "INVALID EVENT WAIT LIST",
            -58 => "INVALID EVENT",
            -59 => "INVALID OPERATION",
            -60 => "INVALID GL OBJECT",
            -61 => "INVALID BUFFER SIZE",
            -62 => "INVALID MIP LEVEL",
            -63 => "INVALID GLOBAL WORK SIZE",
            -64 => "INVALID PROPERTY",
            -65 => "INVALID IMAGE DESCRIPTOR",
            -66 => "INVALID COMPILER OPTIONS",
            -67 => "INVALID LINKER OPTIONS",
            -68 => "INVALID DEVICE PARTITION COUNT",
            _ => "unknown error",
        }
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.text(), self.0)
    }
}
