mod descriptor;
mod host_backend;
