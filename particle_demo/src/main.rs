//! Particle demo application
//!
//! Runs a few hundred frames of a small particle scene on the headless
//! backend, with the GPU lagging behind the CPU, and reports how many buffers
//! the cache had to create.
//!
//! Usage: `particle_demo [config.toml|config.ron]`

use std::sync::Arc;

use particle_engine::foundation::logging;
use particle_engine::prelude::*;

/// Frames simulated by the demo
const FRAME_COUNT: u64 = 240;

/// Frames the simulated GPU runs behind the CPU
const GPU_LATENCY: u64 = 2;

const FRAME_TIME: f32 = 1.0 / 60.0;

#[derive(thiserror::Error, Debug)]
enum DemoError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),
}

struct ParticleDemo {
    renderer: Renderer,
    gpu: HeadlessGpu,
    particles: ParticleManager,
    overlay: DynamicMesh,
    bursts: u32,
}

impl ParticleDemo {
    fn new(config: RendererConfig) -> Result<Self, DemoError> {
        let (backend, gpu) = HeadlessBackend::new();
        let renderer = Renderer::new(backend, config);
        let mut particles = ParticleManager::new(renderer.config().default_layer);

        let atlas = AtlasTable::new()
            .with_entry("stars", Rect::new(Vec2::new(0.0, 0.0), Vec2::new(0.5, 0.5)))
            .with_entry("smoke", Rect::new(Vec2::new(0.5, 0.0), Vec2::new(1.0, 0.5)));
        particles.set_texture_atlas(Arc::new(atlas));

        particles.add_layer_with_config("background", -10, QuadStrategy, ParticleLayerConfig::static_layer())?;
        particles.add_layer("smoke", 0, QuadStrategy)?;
        particles.add_layer("sparks", 10, PointStrategy)?;

        particles
            .spawner::<QuadStrategy>("background", "stars")?
            .spawn_with(64, |star, texcoords, index| {
                let x = (index % 8) as f32 * 0.25 - 1.0;
                let y = (index / 8) as f32 * 0.25 - 1.0;
                star.bounds = Rect::from_center(Vec2::new(x, y), Vec2::new(0.01, 0.01));
                star.texcoords = texcoords;
            })?;

        let smoke = particles.spawner::<QuadStrategy>("smoke", "smoke")?.spawn_with(16, |puff, texcoords, index| {
            puff.bounds = Rect::from_center(Vec2::new(0.0, -0.5), Vec2::new(0.1, 0.1));
            puff.texcoords = texcoords;
            puff.velocity = Vec2::new((index as f32 - 8.0) * 0.01, 0.2);
            puff.color = Vec4::new(0.6, 0.6, 0.6, 0.5);
        })?;
        let smoke_count = particles.layer::<QuadStrategy>("smoke")?.allocation(smoke)?.count();
        log::info!("Smoke allocation holds {} particles", smoke_count);

        Ok(Self {
            renderer,
            gpu,
            particles,
            overlay: DynamicMesh::new(),
            bursts: 0,
        })
    }

    /// Emit a short-lived burst of sparks that cleans itself up
    fn spawn_burst(&mut self, frame: u64) -> Result<(), DemoError> {
        let sparks = self.particles.layer_mut::<PointStrategy>("sparks")?;
        let burst = sparks.spawn(32)?;
        sparks.set_destroy_when_empty(burst, true)?;

        let origin = Vec2::new((frame % 7) as f32 * 0.2 - 0.6, 0.0);
        for (index, spark) in sparks.accessor_mut(burst)?.iter_mut().enumerate() {
            let angle = index as f32 * std::f32::consts::TAU / 32.0;
            spark.position = origin;
            spark.velocity = Vec2::new(angle.cos(), angle.sin()) * 0.5;
            spark.life = 0.25 + (index % 4) as f32 * 0.1;
            spark.size = 3.0;
        }
        self.bursts += 1;
        Ok(())
    }

    fn frame(&mut self, frame: u64) -> Result<(), DemoError> {
        if frame % 30 == 0 {
            self.spawn_burst(frame)?;
        }

        self.renderer.begin_frame();
        self.particles.tick(FRAME_TIME);
        self.particles.render(&mut self.renderer);

        // Frame counter bar, rebuilt every frame
        let width = (frame % 60) as f32 / 60.0;
        self.overlay.clear(self.renderer.cache_mut());
        self.overlay
            .push_vertices(&mut self.renderer, PrimitiveType::Lines, &[[-1.0f32, 0.95], [width * 2.0 - 1.0, 0.95]])?;
        self.overlay.render(&mut self.renderer);
        self.renderer.end_frame()?;

        if frame >= GPU_LATENCY {
            self.gpu.complete_next(1);
        }
        self.gpu.take_draws();

        if frame % 60 == 0 {
            let stats = self.renderer.frame_stats();
            log::info!(
                "Frame {}: {} draws, {} vertices, {} particles",
                frame,
                stats.draw_calls,
                stats.vertices,
                self.particles.total_particle_count()
            );
        }
        Ok(())
    }

    fn run(&mut self) -> Result<(), DemoError> {
        for frame in 0..FRAME_COUNT {
            self.frame(frame)?;
        }
        Ok(())
    }

    fn shutdown(mut self) {
        self.overlay.clear(self.renderer.cache_mut());
        self.particles.release_gpu_resources(self.renderer.cache_mut());
        self.gpu.complete_all();

        let stats = self.renderer.cache().stats();
        log::info!(
            "{} bursts, cache served {} buffers, created {} ({} buffers cached, {} bytes)",
            self.bursts,
            stats.hits,
            stats.misses,
            stats.cached_buffers,
            stats.cached_bytes
        );

        let timed_out = self.renderer.shutdown();
        if timed_out > 0 {
            log::error!("{} fences never signaled", timed_out);
        }
        log::info!(
            "Buffers created {}, destroyed {}",
            self.gpu.buffers_created(),
            self.gpu.buffers_destroyed()
        );
    }
}

fn load_config() -> Result<RendererConfig, DemoError> {
    match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading renderer configuration from {}", path);
            Ok(RendererConfig::load_from_file(path)?)
        }
        None => Ok(RendererConfig::default()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    log::info!("Starting particle demo");

    let config = load_config()?;
    let mut demo = ParticleDemo::new(config)?;
    let result = demo.run();
    demo.shutdown();

    match result {
        Ok(()) => {
            log::info!("Particle demo finished successfully");
            Ok(())
        }
        Err(error) => {
            log::error!("Particle demo failed: {}", error);
            Err(error.into())
        }
    }
}
