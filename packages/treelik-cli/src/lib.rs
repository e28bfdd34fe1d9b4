pub mod cli;
pub mod commands;

#[cfg(test)]
mod tests {
  use ctor::ctor;
  use treelik::utils::global_init::global_init;

  #[ctor]
  fn init() {
    global_init();
  }
}
