pub mod bitmap_free_map;
pub mod mem_device;
