fn main() -> anyhow::Result<()> {
    go_arena::eval::eval_cmd::run_main()
}
