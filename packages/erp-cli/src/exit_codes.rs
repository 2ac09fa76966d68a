pub const SUCCESS: i32 = 0;
/// Engine fault, I/O or serialization failure
pub const EXECUTION_ERROR: i32 = 1;
/// Bad configuration or arguments
pub const INPUT_ERROR: i32 = 2;
