pub mod host_scale_factor;
