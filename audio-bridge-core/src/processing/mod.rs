pub mod iso_packets;
pub mod prebuffer;
pub mod render;
pub mod ring_buffer;
