//! Console front end for the caster stream session.

fn main() -> anyhow::Result<()> {
    caster_lib::run()
}
